//! Diesel row types.

use diesel::prelude::*;

use crate::schema::{analysis_jobs, analysis_stage_results};

/// Analysis job row.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = analysis_jobs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct JobRecord {
    pub id: String,
    pub identity: String,
    pub total_stages: i32,
    pub processed_stages: i32,
    pub status: String,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = analysis_jobs)]
pub struct NewJob<'a> {
    pub id: &'a str,
    pub identity: &'a str,
    pub total_stages: i32,
    pub processed_stages: i32,
    pub status: &'a str,
    pub error_message: Option<&'a str>,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

/// Stage result row.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = analysis_stage_results)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct StageResultRecord {
    pub id: i32,
    pub job_id: String,
    pub stage_index: i32,
    pub item_count: i32,
    pub status: String,
    pub payload: Option<String>,
    pub error: Option<String>,
    pub created_at: String,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = analysis_stage_results)]
pub struct NewStageResult<'a> {
    pub job_id: &'a str,
    pub stage_index: i32,
    pub item_count: i32,
    pub status: &'a str,
    pub payload: Option<&'a str>,
    pub error: Option<&'a str>,
    pub created_at: &'a str,
}
