use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_customer_tables::Migration),
            Box::new(m20240101_000002_create_catalog_tables::Migration),
            Box::new(m20240101_000003_create_cart_items_table::Migration),
            Box::new(m20240101_000004_create_order_tables::Migration),
            Box::new(m20240101_000005_create_logs_table::Migration),
        ]
    }
}

// Migration implementations

mod m20240101_000001_create_customer_tables {
    use super::{CustomerAddresses, Customers, ShippingAreas};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000001_create_customer_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Customers::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Customers::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Customers::FirstName).string().not_null())
                        .col(ColumnDef::new(Customers::LastName).string().not_null())
                        .col(ColumnDef::new(Customers::Email).string().not_null())
                        .col(ColumnDef::new(Customers::PhoneNumber).string().null())
                        .col(
                            ColumnDef::new(Customers::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(ShippingAreas::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ShippingAreas::Id)
                                .integer()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ShippingAreas::FullName).string().not_null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(CustomerAddresses::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(CustomerAddresses::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(CustomerAddresses::CustomerId).uuid().not_null())
                        .col(
                            ColumnDef::new(CustomerAddresses::RecipientName)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CustomerAddresses::PhoneNumber)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(CustomerAddresses::FullAddress).text().not_null())
                        .col(
                            ColumnDef::new(CustomerAddresses::ShippingAreaId)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CustomerAddresses::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_customer_addresses_customer_id")
                                .from(CustomerAddresses::Table, CustomerAddresses::CustomerId)
                                .to(Customers::Table, Customers::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_customer_addresses_shipping_area_id")
                                .from(CustomerAddresses::Table, CustomerAddresses::ShippingAreaId)
                                .to(ShippingAreas::Table, ShippingAreas::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_customer_addresses_customer_id")
                        .table(CustomerAddresses::Table)
                        .col(CustomerAddresses::CustomerId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(CustomerAddresses::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(ShippingAreas::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Customers::Table).to_owned())
                .await
        }
    }
}

mod m20240101_000002_create_catalog_tables {
    use super::{Inventories, Products};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000002_create_catalog_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Products::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Products::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Products::Name).string().not_null())
                        .col(ColumnDef::new(Products::Description).text().not_null())
                        .col(ColumnDef::new(Products::Price).big_integer().not_null())
                        .col(ColumnDef::new(Products::Weight).decimal_len(12, 3).not_null())
                        .col(ColumnDef::new(Products::Length).decimal_len(12, 3).not_null())
                        .col(ColumnDef::new(Products::Width).decimal_len(12, 3).not_null())
                        .col(ColumnDef::new(Products::Height).decimal_len(12, 3).not_null())
                        .col(
                            ColumnDef::new(Products::DeletedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Products::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Inventories::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Inventories::ProductId)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Inventories::Quantity)
                                .integer()
                                .not_null()
                                .default(0)
                                .check(Expr::col(Inventories::Quantity).gte(0)),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_inventories_product_id")
                                .from(Inventories::Table, Inventories::ProductId)
                                .to(Products::Table, Products::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Inventories::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Products::Table).to_owned())
                .await
        }
    }
}

mod m20240101_000003_create_cart_items_table {
    use super::{CartItems, Customers, Products};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000003_create_cart_items_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(CartItems::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(CartItems::CustomerId).uuid().not_null())
                        .col(ColumnDef::new(CartItems::ProductId).uuid().not_null())
                        .col(ColumnDef::new(CartItems::Quantity).integer().not_null())
                        .col(
                            ColumnDef::new(CartItems::Checked)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(CartItems::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .primary_key(
                            Index::create()
                                .name("pk_cart_items")
                                .col(CartItems::CustomerId)
                                .col(CartItems::ProductId),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_cart_items_customer_id")
                                .from(CartItems::Table, CartItems::CustomerId)
                                .to(Customers::Table, Customers::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_cart_items_product_id")
                                .from(CartItems::Table, CartItems::ProductId)
                                .to(Products::Table, Products::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(CartItems::Table).to_owned())
                .await
        }
    }
}

mod m20240101_000004_create_order_tables {
    use super::{CustomerAddresses, Customers, OrderItems, Orders};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000004_create_order_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Orders::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Orders::Id)
                                .big_integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(Orders::CustomerId).uuid().not_null())
                        .col(ColumnDef::new(Orders::AddressId).uuid().not_null())
                        .col(ColumnDef::new(Orders::CourierCode).string().not_null())
                        .col(ColumnDef::new(Orders::FreightCost).big_integer().not_null())
                        .col(ColumnDef::new(Orders::ItemCost).big_integer().not_null())
                        .col(ColumnDef::new(Orders::GrossAmount).big_integer().not_null())
                        .col(ColumnDef::new(Orders::PaymentToken).string().null())
                        .col(ColumnDef::new(Orders::PaymentRedirectUrl).string().null())
                        .col(
                            ColumnDef::new(Orders::TransactionStatus)
                                .string()
                                .not_null()
                                .default(""),
                        )
                        .col(
                            ColumnDef::new(Orders::PaymentType)
                                .string()
                                .not_null()
                                .default(""),
                        )
                        .col(
                            ColumnDef::new(Orders::StatusDescription)
                                .string()
                                .not_null()
                                .default(""),
                        )
                        .col(
                            ColumnDef::new(Orders::IsPaid)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(Orders::IsCancelled)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(Orders::NeedRefund)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(Orders::StockReconciled)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(Orders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_orders_customer_id")
                                .from(Orders::Table, Orders::CustomerId)
                                .to(Customers::Table, Customers::Id),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_orders_address_id")
                                .from(Orders::Table, Orders::AddressId)
                                .to(CustomerAddresses::Table, CustomerAddresses::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_customer_id")
                        .table(Orders::Table)
                        .col(Orders::CustomerId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(OrderItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OrderItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderItems::OrderId).big_integer().not_null())
                        .col(ColumnDef::new(OrderItems::ProductId).uuid().not_null())
                        .col(ColumnDef::new(OrderItems::OnBuyName).string().not_null())
                        .col(ColumnDef::new(OrderItems::OnBuyDescription).text().not_null())
                        .col(ColumnDef::new(OrderItems::OnBuyPrice).big_integer().not_null())
                        .col(
                            ColumnDef::new(OrderItems::OnBuyWeight)
                                .decimal_len(12, 3)
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderItems::Quantity).integer().not_null())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_order_items_order_id")
                                .from(OrderItems::Table, OrderItems::OrderId)
                                .to(Orders::Table, Orders::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_order_items_order_id")
                        .table(OrderItems::Table)
                        .col(OrderItems::OrderId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OrderItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }
}

mod m20240101_000005_create_logs_table {
    use super::Logs;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000005_create_logs_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Logs::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Logs::Id)
                                .big_integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(Logs::LogLevel).string_len(16).not_null())
                        .col(ColumnDef::new(Logs::Info).text().not_null())
                        .col(
                            ColumnDef::new(Logs::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Logs::Table).to_owned())
                .await
        }
    }
}

#[derive(DeriveIden)]
enum Customers {
    Table,
    Id,
    FirstName,
    LastName,
    Email,
    PhoneNumber,
    CreatedAt,
}

#[derive(DeriveIden)]
enum ShippingAreas {
    Table,
    Id,
    FullName,
}

#[derive(DeriveIden)]
enum CustomerAddresses {
    Table,
    Id,
    CustomerId,
    RecipientName,
    PhoneNumber,
    FullAddress,
    ShippingAreaId,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Products {
    Table,
    Id,
    Name,
    Description,
    Price,
    Weight,
    Length,
    Width,
    Height,
    DeletedAt,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Inventories {
    Table,
    ProductId,
    Quantity,
}

#[derive(DeriveIden)]
enum CartItems {
    Table,
    CustomerId,
    ProductId,
    Quantity,
    Checked,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Orders {
    Table,
    Id,
    CustomerId,
    AddressId,
    CourierCode,
    FreightCost,
    ItemCost,
    GrossAmount,
    PaymentToken,
    PaymentRedirectUrl,
    TransactionStatus,
    PaymentType,
    StatusDescription,
    IsPaid,
    IsCancelled,
    NeedRefund,
    StockReconciled,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum OrderItems {
    Table,
    Id,
    OrderId,
    ProductId,
    OnBuyName,
    OnBuyDescription,
    OnBuyPrice,
    OnBuyWeight,
    Quantity,
}

#[derive(DeriveIden)]
enum Logs {
    Table,
    Id,
    LogLevel,
    Info,
    CreatedAt,
}
