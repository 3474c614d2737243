use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set};
use tracing::debug;
use uuid::Uuid;

use crate::{
    entities::{
        customer::{self, Entity as CustomerEntity},
        customer_address,
    },
    errors::ServiceError,
};

/// Customer resolution used by checkout.
///
/// Operations are generic over the connection so they can participate in the
/// checkout transaction.
pub struct CustomerService;

impl CustomerService {
    /// Resolves a customer by email, creating one when absent. Emails are
    /// normalized to lowercase.
    pub async fn find_or_create<C: ConnectionTrait>(
        conn: &C,
        email: &str,
        name: &str,
        phone: Option<String>,
    ) -> Result<customer::Model, ServiceError> {
        let email = email.trim().to_lowercase();

        if let Some(existing) = CustomerEntity::find()
            .filter(customer::Column::Email.eq(email.clone()))
            .one(conn)
            .await?
        {
            debug!(customer_id = %existing.id, "existing customer resolved");
            return Ok(existing);
        }

        let now = Utc::now();
        let created = customer::ActiveModel {
            id: Set(Uuid::new_v4()),
            email: Set(email),
            name: Set(name.trim().to_string()),
            phone: Set(phone),
            created_at: Set(now),
            updated_at: Set(None),
        }
        .insert(conn)
        .await?;

        debug!(customer_id = %created.id, "customer created");
        Ok(created)
    }

    /// Creates the shipping address record for an order.
    pub async fn create_address<C: ConnectionTrait>(
        conn: &C,
        customer_id: Uuid,
        street: &str,
        city: &str,
        province: &str,
        postal_code: &str,
        country: &str,
    ) -> Result<customer_address::Model, ServiceError> {
        let address = customer_address::ActiveModel {
            id: Set(Uuid::new_v4()),
            customer_id: Set(customer_id),
            street: Set(street.trim().to_string()),
            city: Set(city.trim().to_string()),
            province: Set(province.trim().to_string()),
            postal_code: Set(postal_code.trim().to_string()),
            country: Set(country.trim().to_string()),
            created_at: Set(Utc::now()),
        }
        .insert(conn)
        .await?;

        Ok(address)
    }
}
