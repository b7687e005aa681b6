use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A placed order. `transaction_status` is empty until a payment intent
/// exists, then mirrors the gateway's status string.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub customer_id: Uuid,
    pub address_id: Uuid,
    pub courier_code: String,
    pub freight_cost: i64,
    pub item_cost: i64,
    pub gross_amount: i64,
    pub payment_token: Option<String>,
    pub payment_redirect_url: Option<String>,
    pub transaction_status: String,
    pub payment_type: String,
    pub status_description: String,
    pub is_paid: bool,
    pub is_cancelled: bool,
    pub need_refund: bool,
    pub stock_reconciled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    pub fn status(&self) -> TransactionStatus {
        TransactionStatus::from_db(&self.transaction_status)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItems,
    #[sea_orm(
        belongs_to = "super::customer::Entity",
        from = "Column::CustomerId",
        to = "super::customer::Column::Id"
    )]
    Customer,
    #[sea_orm(
        belongs_to = "super::customer_address::Entity",
        from = "Column::AddressId",
        to = "super::customer_address::Column::Id"
    )]
    Address,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItems.def()
    }
}

impl Related<super::customer::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Customer.def()
    }
}

impl Related<super::customer_address::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Address.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Gateway transaction status as stored on an order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransactionStatus {
    /// No payment intent yet (stored as an empty string)
    Unplaced,
    Pending,
    PendingCancel,
    Settlement,
    Capture,
    Deny,
    Cancel,
    Expire,
    Other(String),
}

impl TransactionStatus {
    pub fn from_db(value: &str) -> Self {
        match value {
            "" => Self::Unplaced,
            "pending" => Self::Pending,
            "pending cancel" => Self::PendingCancel,
            "settlement" => Self::Settlement,
            "capture" => Self::Capture,
            "deny" => Self::Deny,
            "cancel" => Self::Cancel,
            "expire" => Self::Expire,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Unplaced => "",
            Self::Pending => "pending",
            Self::PendingCancel => "pending cancel",
            Self::Settlement => "settlement",
            Self::Capture => "capture",
            Self::Deny => "deny",
            Self::Cancel => "cancel",
            Self::Expire => "expire",
            Self::Other(other) => other,
        }
    }

    pub fn is_paid(&self) -> bool {
        matches!(self, Self::Settlement | Self::Capture)
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Self::Deny | Self::Cancel | Self::Expire)
    }

    /// Paid or void; no further transition is accepted.
    pub fn is_terminal(&self) -> bool {
        self.is_paid() || self.is_void()
    }

    /// Part of the placement-to-settlement lifecycle. Anything else
    /// (refund, partial_refund, chargeback) is an after-the-fact status the
    /// order only mirrors.
    pub fn is_lifecycle(&self) -> bool {
        self.is_terminal() || matches!(self, Self::Unplaced | Self::Pending | Self::PendingCancel)
    }

    /// The hosted payment page is still usable.
    pub fn awaits_payment(&self) -> bool {
        matches!(self, Self::Unplaced | Self::Pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_storage_form() {
        for raw in ["", "pending", "pending cancel", "settlement", "capture", "deny", "cancel", "expire", "refund"] {
            assert_eq!(TransactionStatus::from_db(raw).as_str(), raw);
        }
    }

    #[test]
    fn terminal_set_matches_classification() {
        for raw in ["settlement", "capture", "deny", "cancel", "expire"] {
            assert!(TransactionStatus::from_db(raw).is_terminal(), "{raw}");
            assert!(TransactionStatus::from_db(raw).is_lifecycle(), "{raw}");
        }
        for raw in ["refund", "partial_refund", "chargeback"] {
            assert!(!TransactionStatus::from_db(raw).is_lifecycle(), "{raw}");
        }
        assert!(TransactionStatus::Pending.is_lifecycle());
        assert!(!TransactionStatus::Pending.is_terminal());
        assert!(!TransactionStatus::PendingCancel.is_terminal());
        assert!(TransactionStatus::Unplaced.awaits_payment());
        assert!(!TransactionStatus::Settlement.awaits_payment());
    }
}
