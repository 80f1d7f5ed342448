//! Catalog collections: accounts and bases.

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, Bson, Document as BsonDocument};
use tracing::{info, warn};

use super::{
    bson_field_error, from_bson_datetime, is_duplicate_key, to_bson_datetime, MongoPersister,
};
use crate::id::new_id;
use crate::interfaces::{Result, StorageError, TenantCatalog};
use crate::model::{Base, Customer};
use crate::storage::helpers::validate_new_base;

fn customer_to_document(customer: &Customer) -> BsonDocument {
    doc! {
        "_id": &customer.id,
        "email": &customer.email,
        "stripeId": &customer.stripe_id,
        "subscriptionId": &customer.subscription_id,
        "isActive": customer.is_active,
        "created": to_bson_datetime(customer.created),
    }
}

fn customer_from_document(doc: &BsonDocument) -> Result<Customer> {
    Ok(Customer {
        id: doc.get_str("_id").map_err(bson_field_error)?.to_string(),
        email: doc.get_str("email").map_err(bson_field_error)?.to_string(),
        stripe_id: doc.get_str("stripeId").unwrap_or_default().to_string(),
        subscription_id: doc.get_str("subscriptionId").unwrap_or_default().to_string(),
        is_active: doc.get_bool("isActive").unwrap_or(false),
        created: from_bson_datetime(*doc.get_datetime("created").map_err(bson_field_error)?),
    })
}

fn base_to_document(base: &Base) -> BsonDocument {
    doc! {
        "_id": &base.id,
        "customerId": &base.customer_id,
        "name": &base.name,
        "allowedDomains": base.allowed_domains.clone(),
        "isActive": base.is_active,
        "monthlyEmailSent": base.monthly_email_sent,
        "created": to_bson_datetime(base.created),
    }
}

fn base_from_document(doc: &BsonDocument) -> Result<Base> {
    let allowed_domains = doc
        .get_array("allowedDomains")
        .map(|domains| {
            domains
                .iter()
                .filter_map(Bson::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let monthly_email_sent = match doc.get("monthlyEmailSent") {
        Some(Bson::Int64(n)) => *n,
        Some(Bson::Int32(n)) => i64::from(*n),
        _ => 0,
    };

    Ok(Base {
        id: doc.get_str("_id").map_err(bson_field_error)?.to_string(),
        customer_id: doc.get_str("customerId").map_err(bson_field_error)?.to_string(),
        name: doc.get_str("name").map_err(bson_field_error)?.to_string(),
        allowed_domains,
        is_active: doc.get_bool("isActive").unwrap_or(false),
        monthly_email_sent,
        created: from_bson_datetime(*doc.get_datetime("created").map_err(bson_field_error)?),
    })
}

impl MongoPersister {
    async fn find_customer(&self, filter: BsonDocument, key: &str) -> Result<Customer> {
        match self.accounts().find_one(filter).await? {
            Some(doc) => customer_from_document(&doc),
            None => Err(StorageError::not_found("customer", key)),
        }
    }

    async fn delete_catalog_entries(&self, base_name: &str, email: &str) -> Result<()> {
        self.bases().delete_one(doc! { "name": base_name }).await?;
        self.accounts()
            .delete_one(doc! { "email": email.to_lowercase() })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl TenantCatalog for MongoPersister {
    async fn create_customer(&self, mut customer: Customer) -> Result<Customer> {
        customer.id = new_id();
        customer.email = customer.email.to_lowercase();

        match self
            .accounts()
            .insert_one(customer_to_document(&customer))
            .await
        {
            Ok(_) => Ok(customer),
            Err(e) if is_duplicate_key(&e) => {
                Err(StorageError::conflict("customer", customer.email))
            }
            Err(e) => Err(e.into()),
        }
    }

    #[tracing::instrument(name = "catalog.create_base", skip_all, fields(base = %base.name))]
    async fn create_base(&self, mut base: Base) -> Result<Base> {
        validate_new_base(&base.name, self.catalog.name())?;
        base.id = new_id();

        match self.bases().insert_one(base_to_document(&base)).await {
            Ok(_) => {}
            Err(e) if is_duplicate_key(&e) => {
                return Err(StorageError::conflict("base", base.name));
            }
            Err(e) => return Err(e.into()),
        }

        self.provision_base(&base.name).await?;
        info!(base = %base.name, "Provisioned base database");
        Ok(base)
    }

    async fn find_account(&self, customer_id: &str) -> Result<Customer> {
        self.find_customer(doc! { "_id": customer_id }, customer_id)
            .await
    }

    async fn find_database(&self, base_id: &str) -> Result<Base> {
        match self.bases().find_one(doc! { "_id": base_id }).await? {
            Some(doc) => base_from_document(&doc),
            None => Err(StorageError::not_found("base", base_id)),
        }
    }

    async fn list_databases(&self) -> Result<Vec<Base>> {
        let docs: Vec<BsonDocument> = self
            .bases()
            .find(doc! { "isActive": true })
            .sort(doc! { "_id": 1 })
            .await?
            .try_collect()
            .await?;
        docs.iter().map(base_from_document).collect()
    }

    async fn get_customer_by_stripe_id(&self, stripe_id: &str) -> Result<Customer> {
        self.find_customer(doc! { "stripeId": stripe_id }, stripe_id)
            .await
    }

    async fn email_exists(&self, email: &str) -> Result<bool> {
        let count = self
            .accounts()
            .count_documents(doc! { "email": email.to_lowercase() })
            .await?;
        Ok(count > 0)
    }

    async fn database_exists(&self, name: &str) -> Result<bool> {
        let count = self
            .bases()
            .count_documents(doc! { "name": name })
            .await?;
        Ok(count > 0)
    }

    async fn increment_monthly_email_sent(&self, base_id: &str) -> Result<()> {
        let result = self
            .bases()
            .update_one(
                doc! { "_id": base_id },
                doc! { "$inc": { "monthlyEmailSent": 1_i64 } },
            )
            .await?;
        if result.matched_count == 0 {
            return Err(StorageError::not_found("base", base_id));
        }
        Ok(())
    }

    async fn activate_customer(&self, customer_id: &str) -> Result<()> {
        let result = self
            .accounts()
            .update_one(
                doc! { "_id": customer_id },
                doc! { "$set": { "isActive": true } },
            )
            .await?;
        if result.matched_count == 0 {
            return Err(StorageError::not_found("customer", customer_id));
        }

        self.bases()
            .update_many(
                doc! { "customerId": customer_id },
                doc! { "$set": { "isActive": true } },
            )
            .await?;
        Ok(())
    }

    #[tracing::instrument(name = "catalog.delete_customer", skip_all, fields(base = %base_name))]
    async fn delete_customer(&self, base_name: &str, email: &str) -> Result<()> {
        validate_new_base(base_name, self.catalog.name())?;

        self.database(base_name).drop().await?;
        info!(base = %base_name, "Dropped base database");

        if let Err(e) = self.delete_catalog_entries(base_name, email).await {
            warn!(base = %base_name, error = %e, "Catalog cleanup failed after database drop");
            return Err(StorageError::OrphanedCatalog {
                base: base_name.to_string(),
                message: e.to_string(),
            });
        }
        Ok(())
    }
}
