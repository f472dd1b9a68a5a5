use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema, DEFAULT_TIMESTAMP};

const PRODUCTS_TABLE: Table = Table {
    name: "products",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("title", &SqlType::Text, non_null = true),
        sqlite_column!("file_path", &SqlType::Text, non_null = true),
        sqlite_column!("file_name", &SqlType::Text, non_null = true),
        sqlite_column!(
            "active",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("1")
        ),
    ],
    indices: &[],
};

const DOWNLOAD_ACCESS_TABLE: Table = Table {
    name: "download_access",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!(
            "transaction_id",
            &SqlType::Integer,
            non_null = true,
            is_unique = true
        ),
        sqlite_column!("user_id", &SqlType::Integer, non_null = true),
        sqlite_column!("product_id", &SqlType::Integer, non_null = true),
        sqlite_column!("token", &SqlType::Text, non_null = true, is_unique = true),
        sqlite_column!(
            "download_count",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "max_downloads",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("3")
        ),
        sqlite_column!("last_access", &SqlType::Integer),
        sqlite_column!("expires_at", &SqlType::Integer, non_null = true),
        sqlite_column!(
            "created_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    indices: &[
        ("idx_download_access_user", "user_id"),
        ("idx_download_access_expires", "expires_at"),
    ],
};

const DOWNLOAD_ATTEMPTS_TABLE: Table = Table {
    name: "download_attempts",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("token", &SqlType::Text, non_null = true),
        sqlite_column!("client_ip", &SqlType::Text),
        sqlite_column!("user_agent", &SqlType::Text),
        sqlite_column!("success", &SqlType::Integer, non_null = true),
        sqlite_column!("reason", &SqlType::Text, non_null = true),
        sqlite_column!(
            "created_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    indices: &[("idx_download_attempts_token", "token")],
};

const JOB_RUNS_TABLE: Table = Table {
    name: "job_runs",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("job_id", &SqlType::Text, non_null = true),
        sqlite_column!("triggered_by", &SqlType::Text, non_null = true),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("error_message", &SqlType::Text),
        sqlite_column!("started_at", &SqlType::Integer, non_null = true),
        sqlite_column!("finished_at", &SqlType::Integer),
    ],
    indices: &[("idx_job_runs_job", "job_id")],
};

pub const ACCESS_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[
        PRODUCTS_TABLE,
        DOWNLOAD_ACCESS_TABLE,
        DOWNLOAD_ATTEMPTS_TABLE,
        JOB_RUNS_TABLE,
    ],
    migration: None,
}];
