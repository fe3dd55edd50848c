use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240301_000001_create_products_table::Migration),
            Box::new(m20240301_000002_create_vouchers_table::Migration),
            Box::new(m20240301_000003_create_user_vouchers_table::Migration),
            Box::new(m20240301_000004_create_orders_table::Migration),
            Box::new(m20240301_000005_create_order_items_table::Migration),
        ]
    }
}

mod m20240301_000001_create_products_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000001_create_products_table"
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
                        .col(ColumnDef::new(Products::CategoryId).string().not_null())
                        .col(
                            ColumnDef::new(Products::StockQuantity)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Products::PurchaseCount)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Products::InStock)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(Products::IsTrending)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(ColumnDef::new(Products::CreatedAt).timestamp().not_null())
                        .col(ColumnDef::new(Products::UpdatedAt).timestamp().not_null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_products_purchase_count")
                        .table(Products::Table)
                        .col(Products::PurchaseCount)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Products::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Products {
        Table,
        Id,
        Name,
        CategoryId,
        StockQuantity,
        PurchaseCount,
        InStock,
        IsTrending,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000002_create_vouchers_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000002_create_vouchers_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Vouchers::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Vouchers::Id).uuid().primary_key().not_null())
                        .col(
                            ColumnDef::new(Vouchers::Code)
                                .string_len(64)
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Vouchers::Description).string().not_null())
                        .col(ColumnDef::new(Vouchers::DiscountType).string_len(32).not_null())
                        .col(ColumnDef::new(Vouchers::DiscountValue).big_integer().not_null())
                        .col(ColumnDef::new(Vouchers::MaxDiscount).big_integer().null())
                        .col(ColumnDef::new(Vouchers::MinPurchase).big_integer().null())
                        .col(ColumnDef::new(Vouchers::StartDate).timestamp().not_null())
                        .col(ColumnDef::new(Vouchers::EndDate).timestamp().not_null())
                        .col(
                            ColumnDef::new(Vouchers::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(ColumnDef::new(Vouchers::UsageLimit).integer().null())
                        .col(
                            ColumnDef::new(Vouchers::UsageCount)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Vouchers::ApplicableProducts).text().not_null())
                        .col(ColumnDef::new(Vouchers::ApplicableCategories).text().not_null())
                        .col(ColumnDef::new(Vouchers::CreatedAt).timestamp().not_null())
                        .col(ColumnDef::new(Vouchers::UpdatedAt).timestamp().not_null())
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Vouchers::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Vouchers {
        Table,
        Id,
        Code,
        Description,
        DiscountType,
        DiscountValue,
        MaxDiscount,
        MinPurchase,
        StartDate,
        EndDate,
        IsActive,
        UsageLimit,
        UsageCount,
        ApplicableProducts,
        ApplicableCategories,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000003_create_user_vouchers_table {

    use super::m20240301_000002_create_vouchers_table::Vouchers;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000003_create_user_vouchers_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(UserVouchers::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(UserVouchers::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(UserVouchers::UserId).uuid().not_null())
                        .col(ColumnDef::new(UserVouchers::VoucherId).uuid().not_null())
                        .col(
                            ColumnDef::new(UserVouchers::IsUsed)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(ColumnDef::new(UserVouchers::ClaimedAt).timestamp().not_null())
                        .col(ColumnDef::new(UserVouchers::UsedAt).timestamp().null())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_user_vouchers_voucher_id")
                                .from(UserVouchers::Table, UserVouchers::VoucherId)
                                .to(Vouchers::Table, Vouchers::Id)
                                .on_delete(ForeignKeyAction::Restrict)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_user_vouchers_user_voucher")
                        .table(UserVouchers::Table)
                        .col(UserVouchers::UserId)
                        .col(UserVouchers::VoucherId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(UserVouchers::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum UserVouchers {
        Table,
        Id,
        UserId,
        VoucherId,
        IsUsed,
        ClaimedAt,
        UsedAt,
    }
}

mod m20240301_000004_create_orders_table {

    use super::m20240301_000002_create_vouchers_table::Vouchers;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000004_create_orders_table"
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
                        .col(ColumnDef::new(Orders::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Orders::UserId).uuid().not_null())
                        .col(ColumnDef::new(Orders::Subtotal).big_integer().not_null())
                        .col(
                            ColumnDef::new(Orders::ShippingFee)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Orders::DiscountAmount)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Orders::Total).big_integer().not_null())
                        .col(ColumnDef::new(Orders::Currency).string_len(3).not_null())
                        .col(ColumnDef::new(Orders::VoucherId).uuid().null())
                        .col(ColumnDef::new(Orders::Status).string_len(32).not_null())
                        .col(ColumnDef::new(Orders::PaymentStatus).string_len(32).not_null())
                        .col(ColumnDef::new(Orders::PaymentMethod).string_len(32).not_null())
                        .col(ColumnDef::new(Orders::PaymentReference).string().null())
                        .col(ColumnDef::new(Orders::Country).string().not_null())
                        .col(ColumnDef::new(Orders::CreatedAt).timestamp().not_null())
                        .col(ColumnDef::new(Orders::UpdatedAt).timestamp().not_null())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_orders_voucher_id")
                                .from(Orders::Table, Orders::VoucherId)
                                .to(Vouchers::Table, Vouchers::Id)
                                .on_delete(ForeignKeyAction::SetNull)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_user_id")
                        .table(Orders::Table)
                        .col(Orders::UserId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_status")
                        .table(Orders::Table)
                        .col(Orders::Status)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Orders {
        Table,
        Id,
        UserId,
        Subtotal,
        ShippingFee,
        DiscountAmount,
        Total,
        Currency,
        VoucherId,
        Status,
        PaymentStatus,
        PaymentMethod,
        PaymentReference,
        Country,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000005_create_order_items_table {

    use super::m20240301_000004_create_orders_table::Orders;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000005_create_order_items_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(OrderItems::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(OrderItems::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(OrderItems::OrderId).uuid().not_null())
                        .col(ColumnDef::new(OrderItems::ProductId).uuid().not_null())
                        .col(ColumnDef::new(OrderItems::Name).string().not_null())
                        .col(ColumnDef::new(OrderItems::UnitPrice).big_integer().not_null())
                        .col(ColumnDef::new(OrderItems::Quantity).integer().not_null())
                        .col(ColumnDef::new(OrderItems::Color).string().null())
                        .col(ColumnDef::new(OrderItems::Size).string().null())
                        .col(ColumnDef::new(OrderItems::Image).string().null())
                        .col(ColumnDef::new(OrderItems::Position).integer().not_null())
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
                .await
        }
    }

    #[derive(DeriveIden)]
    enum OrderItems {
        Table,
        Id,
        OrderId,
        ProductId,
        Name,
        UnitPrice,
        Quantity,
        Color,
        Size,
        Image,
        Position,
    }
}
