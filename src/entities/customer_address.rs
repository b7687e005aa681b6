use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "customer_addresses")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub customer_id: Uuid,
    pub recipient_name: String,
    pub phone_number: String,
    #[sea_orm(column_type = "Text")]
    pub full_address: String,
    pub shipping_area_id: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::customer::Entity",
        from = "Column::CustomerId",
        to = "super::customer::Column::Id"
    )]
    Customer,
    #[sea_orm(
        belongs_to = "super::shipping_area::Entity",
        from = "Column::ShippingAreaId",
        to = "super::shipping_area::Column::Id"
    )]
    ShippingArea,
}

impl Related<super::customer::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Customer.def()
    }
}

impl Related<super::shipping_area::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ShippingArea.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
