//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.
//! Tenant tables are always qualified with the base's schema at call sites.

use sea_query::Iden;

/// Catalog customers table.
#[derive(Iden)]
pub enum Customers {
    Table,
    Id,
    Email,
    StripeId,
    SubscriptionId,
    IsActive,
    Created,
}

/// Catalog bases table.
#[derive(Iden)]
pub enum Bases {
    Table,
    Id,
    CustomerId,
    Name,
    AllowedDomains,
    IsActive,
    MonthlyEmailSent,
    Created,
}

/// Columns shared by every user collection table.
#[derive(Iden)]
pub enum Documents {
    Id,
    AccountId,
    Data,
    Created,
}

/// Per-base scheduled tasks.
#[derive(Iden)]
pub enum Tasks {
    #[iden = "sb_tasks"]
    Table,
    Id,
    Name,
    #[iden = "type"]
    TaskType,
    Value,
    Meta,
    Interval,
    LastRun,
}

/// Per-base file metadata.
#[derive(Iden)]
pub enum Files {
    #[iden = "sb_files"]
    Table,
    Id,
    AccountId,
    Key,
    Url,
    Size,
    Uploaded,
}

/// Per-base function metadata.
#[derive(Iden)]
pub enum Functions {
    #[iden = "sb_functions"]
    Table,
    Id,
    Name,
    TriggerTopic,
    Code,
    Version,
    LastUpdated,
    LastRun,
}

/// Migration watermark, one table per partition.
#[derive(Iden)]
pub enum Migrations {
    #[iden = "sb_migrations"]
    Table,
    Version,
    Name,
    AppliedAt,
}
