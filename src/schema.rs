// Diesel table definitions. Kept in sync with repository/migrations.rs by hand.

diesel::table! {
    analysis_jobs (id) {
        id -> Text,
        identity -> Text,
        total_stages -> Integer,
        processed_stages -> Integer,
        status -> Text,
        error_message -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    analysis_stage_results (id) {
        id -> Integer,
        job_id -> Text,
        stage_index -> Integer,
        item_count -> Integer,
        status -> Text,
        payload -> Nullable<Text>,
        error -> Nullable<Text>,
        created_at -> Text,
    }
}

diesel::joinable!(analysis_stage_results -> analysis_jobs (job_id));

diesel::allow_tables_to_appear_in_same_query!(analysis_jobs, analysis_stage_results);
