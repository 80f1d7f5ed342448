//! Catalog tables: customers and bases.

use async_trait::async_trait;
use sea_query::{Expr, PostgresQueryBuilder, Query};
use sea_query_binder::SqlxBinder;
use sqlx::postgres::PgRow;
use sqlx::Row;
use tracing::{info, warn};

use super::{is_unique_violation, quote_ident, PostgresPersister};
use crate::id::new_id;
use crate::interfaces::{Result, StorageError, TenantCatalog};
use crate::model::{Base, Customer};
use crate::storage::helpers::validate_new_base;
use crate::storage::schema::{Bases, Customers};

const CUSTOMER_COLUMNS: [Customers; 6] = [
    Customers::Id,
    Customers::Email,
    Customers::StripeId,
    Customers::SubscriptionId,
    Customers::IsActive,
    Customers::Created,
];

const BASE_COLUMNS: [Bases; 7] = [
    Bases::Id,
    Bases::CustomerId,
    Bases::Name,
    Bases::AllowedDomains,
    Bases::IsActive,
    Bases::MonthlyEmailSent,
    Bases::Created,
];

fn customer_from_row(row: &PgRow) -> Result<Customer> {
    Ok(Customer {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        stripe_id: row.try_get("stripe_id")?,
        subscription_id: row.try_get("subscription_id")?,
        is_active: row.try_get("is_active")?,
        created: row.try_get("created")?,
    })
}

fn base_from_row(row: &PgRow) -> Result<Base> {
    let domains: serde_json::Value = row.try_get("allowed_domains")?;
    Ok(Base {
        id: row.try_get("id")?,
        customer_id: row.try_get("customer_id")?,
        name: row.try_get("name")?,
        allowed_domains: serde_json::from_value(domains)?,
        is_active: row.try_get("is_active")?,
        monthly_email_sent: row.try_get("monthly_email_sent")?,
        created: row.try_get("created")?,
    })
}

impl PostgresPersister {
    async fn find_customer_where(&self, column: Customers, value: &str) -> Result<Customer> {
        let query = Query::select()
            .columns(CUSTOMER_COLUMNS)
            .from(self.catalog_table(Customers::Table))
            .and_where(Expr::col(column).eq(value))
            .to_string(PostgresQueryBuilder);

        match sqlx::query(&query).fetch_optional(&self.pool).await? {
            Some(row) => customer_from_row(&row),
            None => Err(StorageError::not_found("customer", value)),
        }
    }

    async fn base_exists_where(&self, column: Bases, value: &str) -> Result<bool> {
        let query = Query::select()
            .column(Bases::Id)
            .from(self.catalog_table(Bases::Table))
            .and_where(Expr::col(column).eq(value))
            .limit(1)
            .to_string(PostgresQueryBuilder);
        Ok(sqlx::query(&query)
            .fetch_optional(&self.pool)
            .await?
            .is_some())
    }

    async fn delete_catalog_entries(&self, base_name: &str, email: &str) -> Result<()> {
        let delete_base = Query::delete()
            .from_table(self.catalog_table(Bases::Table))
            .and_where(Expr::col(Bases::Name).eq(base_name))
            .to_string(PostgresQueryBuilder);
        let delete_customer = Query::delete()
            .from_table(self.catalog_table(Customers::Table))
            .and_where(Expr::col(Customers::Email).eq(email.to_lowercase()))
            .to_string(PostgresQueryBuilder);

        let mut tx = self.pool.begin().await?;
        sqlx::query(&delete_base).execute(&mut *tx).await?;
        sqlx::query(&delete_customer).execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl TenantCatalog for PostgresPersister {
    async fn create_customer(&self, mut customer: Customer) -> Result<Customer> {
        customer.id = new_id();
        customer.email = customer.email.to_lowercase();

        let query = Query::insert()
            .into_table(self.catalog_table(Customers::Table))
            .columns(CUSTOMER_COLUMNS)
            .values_panic([
                customer.id.clone().into(),
                customer.email.clone().into(),
                customer.stripe_id.clone().into(),
                customer.subscription_id.clone().into(),
                customer.is_active.into(),
                customer.created.into(),
            ])
            .to_string(PostgresQueryBuilder);

        match sqlx::query(&query).execute(&self.pool).await {
            Ok(_) => Ok(customer),
            Err(e) if is_unique_violation(&e) => {
                Err(StorageError::conflict("customer", customer.email))
            }
            Err(e) => Err(e.into()),
        }
    }

    #[tracing::instrument(name = "catalog.create_base", skip_all, fields(base = %base.name))]
    async fn create_base(&self, mut base: Base) -> Result<Base> {
        validate_new_base(&base.name, &self.catalog_schema)?;
        base.id = new_id();

        let (sql, values) = Query::insert()
            .into_table(self.catalog_table(Bases::Table))
            .columns(BASE_COLUMNS)
            .values_panic([
                base.id.clone().into(),
                base.customer_id.clone().into(),
                base.name.clone().into(),
                serde_json::to_value(&base.allowed_domains)?.into(),
                base.is_active.into(),
                base.monthly_email_sent.into(),
                base.created.into(),
            ])
            .build_sqlx(PostgresQueryBuilder);

        match sqlx::query_with(&sql, values).execute(&self.pool).await {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(StorageError::conflict("base", base.name));
            }
            Err(e) => return Err(e.into()),
        }

        let report = self.migrate_base(&base.name).await?;
        info!(base = %base.name, version = report.to, "Provisioned base schema");
        Ok(base)
    }

    async fn find_account(&self, customer_id: &str) -> Result<Customer> {
        self.find_customer_where(Customers::Id, customer_id).await
    }

    async fn find_database(&self, base_id: &str) -> Result<Base> {
        let query = Query::select()
            .columns(BASE_COLUMNS)
            .from(self.catalog_table(Bases::Table))
            .and_where(Expr::col(Bases::Id).eq(base_id))
            .to_string(PostgresQueryBuilder);

        match sqlx::query(&query).fetch_optional(&self.pool).await? {
            Some(row) => base_from_row(&row),
            None => Err(StorageError::not_found("base", base_id)),
        }
    }

    async fn list_databases(&self) -> Result<Vec<Base>> {
        let query = Query::select()
            .columns(BASE_COLUMNS)
            .from(self.catalog_table(Bases::Table))
            .and_where(Expr::col(Bases::IsActive).eq(true))
            .order_by(Bases::Id, sea_query::Order::Asc)
            .to_string(PostgresQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(base_from_row).collect()
    }

    async fn get_customer_by_stripe_id(&self, stripe_id: &str) -> Result<Customer> {
        self.find_customer_where(Customers::StripeId, stripe_id)
            .await
    }

    async fn email_exists(&self, email: &str) -> Result<bool> {
        let query = Query::select()
            .column(Customers::Id)
            .from(self.catalog_table(Customers::Table))
            .and_where(Expr::col(Customers::Email).eq(email.to_lowercase()))
            .limit(1)
            .to_string(PostgresQueryBuilder);
        Ok(sqlx::query(&query)
            .fetch_optional(&self.pool)
            .await?
            .is_some())
    }

    async fn database_exists(&self, name: &str) -> Result<bool> {
        self.base_exists_where(Bases::Name, name).await
    }

    async fn increment_monthly_email_sent(&self, base_id: &str) -> Result<()> {
        let query = Query::update()
            .table(self.catalog_table(Bases::Table))
            .value(Bases::MonthlyEmailSent, Expr::col(Bases::MonthlyEmailSent).add(1))
            .and_where(Expr::col(Bases::Id).eq(base_id))
            .to_string(PostgresQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::not_found("base", base_id));
        }
        Ok(())
    }

    async fn activate_customer(&self, customer_id: &str) -> Result<()> {
        let customer = Query::update()
            .table(self.catalog_table(Customers::Table))
            .value(Customers::IsActive, true)
            .and_where(Expr::col(Customers::Id).eq(customer_id))
            .to_string(PostgresQueryBuilder);
        let result = sqlx::query(&customer).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::not_found("customer", customer_id));
        }

        let bases = Query::update()
            .table(self.catalog_table(Bases::Table))
            .value(Bases::IsActive, true)
            .and_where(Expr::col(Bases::CustomerId).eq(customer_id))
            .to_string(PostgresQueryBuilder);
        sqlx::query(&bases).execute(&self.pool).await?;
        Ok(())
    }

    #[tracing::instrument(name = "catalog.delete_customer", skip_all, fields(base = %base_name))]
    async fn delete_customer(&self, base_name: &str, email: &str) -> Result<()> {
        validate_new_base(base_name, &self.catalog_schema)?;

        sqlx::query(&format!(
            "DROP SCHEMA IF EXISTS {} CASCADE",
            quote_ident(base_name)
        ))
        .execute(&self.pool)
        .await?;
        info!(base = %base_name, "Dropped base schema");

        if let Err(e) = self.delete_catalog_entries(base_name, email).await {
            warn!(base = %base_name, error = %e, "Catalog cleanup failed after schema drop");
            return Err(StorageError::OrphanedCatalog {
                base: base_name.to_string(),
                message: e.to_string(),
            });
        }
        Ok(())
    }
}
