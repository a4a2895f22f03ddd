use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_catalog_tables::Migration),
            Box::new(m20240101_000002_create_cart_items_table::Migration),
            Box::new(m20240101_000003_create_coupons_table::Migration),
            Box::new(m20240101_000004_create_order_tables::Migration),
            Box::new(m20240101_000005_create_coupon_usages_table::Migration),
            Box::new(m20240101_000006_create_payments_table::Migration),
            Box::new(m20240101_000007_create_rental_tables::Migration),
        ]
    }
}

/// Shared column identifiers referenced across migrations
#[derive(DeriveIden)]
enum Books {
    Table,
    Id,
    Title,
    Author,
    Isbn,
    Price,
    DiscountPrice,
    Stock,
    Sales,
    IsAvailable,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Orders {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum Coupons {
    Table,
    Id,
}

fn money(col: impl IntoIden) -> ColumnDef {
    ColumnDef::new(col).decimal_len(12, 2).not_null().to_owned()
}

fn timestamp(col: impl IntoIden) -> ColumnDef {
    ColumnDef::new(col)
        .timestamp_with_time_zone()
        .not_null()
        .to_owned()
}

mod m20240101_000001_create_catalog_tables {
    use super::{money, timestamp, Books};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000001_create_catalog_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Books::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Books::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Books::Title).string().not_null())
                        .col(ColumnDef::new(Books::Author).string().not_null())
                        .col(ColumnDef::new(Books::Isbn).string_len(20).null())
                        .col(&mut money(Books::Price))
                        .col(ColumnDef::new(Books::DiscountPrice).decimal_len(12, 2).null())
                        .col(
                            ColumnDef::new(Books::Stock)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Books::Sales)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Books::IsAvailable)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(&mut timestamp(Books::CreatedAt))
                        .col(&mut timestamp(Books::UpdatedAt))
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(ShippingFees::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ShippingFees::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ShippingFees::CityName).string().not_null())
                        .col(
                            ColumnDef::new(ShippingFees::CityKey)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(&mut money(ShippingFees::Fee))
                        .col(
                            ColumnDef::new(ShippingFees::IsDefault)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(ShippingFees::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(&mut timestamp(ShippingFees::UpdatedAt))
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ShippingFees::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Books::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum ShippingFees {
        Table,
        Id,
        CityName,
        CityKey,
        Fee,
        IsDefault,
        IsActive,
        UpdatedAt,
    }
}

mod m20240101_000002_create_cart_items_table {
    use super::{money, timestamp, Books};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000002_create_cart_items_table"
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
                        .col(ColumnDef::new(CartItems::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(CartItems::UserId).uuid().not_null())
                        .col(ColumnDef::new(CartItems::BookId).uuid().not_null())
                        .col(ColumnDef::new(CartItems::Quantity).integer().not_null())
                        .col(&mut money(CartItems::UnitPrice))
                        .col(&mut timestamp(CartItems::CreatedAt))
                        .col(&mut timestamp(CartItems::UpdatedAt))
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_cart_items_book_id")
                                .from(CartItems::Table, CartItems::BookId)
                                .to(Books::Table, Books::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_cart_items_user_book")
                        .table(CartItems::Table)
                        .col(CartItems::UserId)
                        .col(CartItems::BookId)
                        .unique()
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

    #[derive(DeriveIden)]
    enum CartItems {
        Table,
        Id,
        UserId,
        BookId,
        Quantity,
        UnitPrice,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000003_create_coupons_table {
    use super::{money, timestamp};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000003_create_coupons_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Coupons::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Coupons::Id).uuid().primary_key().not_null())
                        .col(
                            ColumnDef::new(Coupons::Code)
                                .string_len(50)
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Coupons::Description).string().null())
                        .col(ColumnDef::new(Coupons::DiscountType).string_len(16).not_null())
                        .col(&mut money(Coupons::DiscountValue))
                        .col(
                            ColumnDef::new(Coupons::MaxDiscountAmount)
                                .decimal_len(12, 2)
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Coupons::MinPurchaseAmount)
                                .decimal_len(12, 2)
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Coupons::MaxUses).integer().null())
                        .col(
                            ColumnDef::new(Coupons::MaxUsesPerUser)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(
                            ColumnDef::new(Coupons::UsedCount)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(&mut timestamp(Coupons::ValidFrom))
                        .col(&mut timestamp(Coupons::ValidTo))
                        .col(
                            ColumnDef::new(Coupons::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(&mut timestamp(Coupons::CreatedAt))
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Coupons::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Coupons {
        Table,
        Id,
        Code,
        Description,
        DiscountType,
        DiscountValue,
        MaxDiscountAmount,
        MinPurchaseAmount,
        MaxUses,
        MaxUsesPerUser,
        UsedCount,
        ValidFrom,
        ValidTo,
        IsActive,
        CreatedAt,
    }
}

mod m20240101_000004_create_order_tables {
    use super::{money, timestamp, Orders as OrderRef};
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
                        .col(ColumnDef::new(Orders::Id).uuid().primary_key().not_null())
                        .col(
                            ColumnDef::new(Orders::OrderNumber)
                                .string_len(32)
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Orders::UserId).uuid().not_null())
                        .col(ColumnDef::new(Orders::FullName).string().not_null())
                        .col(ColumnDef::new(Orders::Phone).string_len(20).not_null())
                        .col(ColumnDef::new(Orders::Email).string().null())
                        .col(ColumnDef::new(Orders::AddressLine1).string().not_null())
                        .col(ColumnDef::new(Orders::AddressLine2).string().null())
                        .col(ColumnDef::new(Orders::City).string().not_null())
                        .col(ColumnDef::new(Orders::State).string().not_null())
                        .col(ColumnDef::new(Orders::PostalCode).string_len(20).not_null())
                        .col(
                            ColumnDef::new(Orders::Country)
                                .string()
                                .not_null()
                                .default("Bangladesh"),
                        )
                        .col(ColumnDef::new(Orders::Status).string_len(32).not_null())
                        .col(ColumnDef::new(Orders::PaymentStatus).string_len(32).not_null())
                        .col(ColumnDef::new(Orders::PaymentMethod).string_len(32).not_null())
                        .col(ColumnDef::new(Orders::TransactionId).string().null())
                        .col(&mut money(Orders::Subtotal))
                        .col(&mut money(Orders::ShippingCost))
                        .col(&mut money(Orders::Discount))
                        .col(&mut money(Orders::Total))
                        .col(ColumnDef::new(Orders::CouponCode).string_len(50).null())
                        .col(ColumnDef::new(Orders::CustomerNotes).text().null())
                        .col(
                            ColumnDef::new(Orders::IsGift)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(ColumnDef::new(Orders::GiftFromName).string().null())
                        .col(ColumnDef::new(Orders::GiftFromPhone).string_len(20).null())
                        .col(ColumnDef::new(Orders::GiftMessage).text().null())
                        .col(ColumnDef::new(Orders::GiftDeliverDate).date().null())
                        .col(ColumnDef::new(Orders::GiftOccasion).string_len(50).null())
                        .col(ColumnDef::new(Orders::TrackingNumber).string().null())
                        .col(&mut timestamp(Orders::CreatedAt))
                        .col(&mut timestamp(Orders::UpdatedAt))
                        .col(
                            ColumnDef::new(Orders::ConfirmedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Orders::ShippedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Orders::DeliveredAt)
                                .timestamp_with_time_zone()
                                .null(),
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
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(OrderItems::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(OrderItems::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(OrderItems::OrderId).uuid().not_null())
                        .col(ColumnDef::new(OrderItems::BookId).uuid().null())
                        .col(ColumnDef::new(OrderItems::BookTitle).string().not_null())
                        .col(ColumnDef::new(OrderItems::BookAuthor).string().not_null())
                        .col(ColumnDef::new(OrderItems::BookIsbn).string_len(20).null())
                        .col(ColumnDef::new(OrderItems::Quantity).integer().not_null())
                        .col(&mut money(OrderItems::Price))
                        .col(&mut money(OrderItems::Subtotal))
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_order_items_order_id")
                                .from(OrderItems::Table, OrderItems::OrderId)
                                .to(OrderRef::Table, OrderRef::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(OrderStatusHistory::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OrderStatusHistory::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderStatusHistory::OrderId).uuid().not_null())
                        .col(
                            ColumnDef::new(OrderStatusHistory::Status)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderStatusHistory::Notes).text().null())
                        .col(ColumnDef::new(OrderStatusHistory::ChangedBy).string().null())
                        .col(&mut timestamp(OrderStatusHistory::CreatedAt))
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_order_status_history_order_id")
                                .from(OrderStatusHistory::Table, OrderStatusHistory::OrderId)
                                .to(OrderRef::Table, OrderRef::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OrderStatusHistory::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(OrderItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Orders {
        Table,
        Id,
        OrderNumber,
        UserId,
        FullName,
        Phone,
        Email,
        AddressLine1,
        AddressLine2,
        City,
        State,
        PostalCode,
        Country,
        Status,
        PaymentStatus,
        PaymentMethod,
        TransactionId,
        Subtotal,
        ShippingCost,
        Discount,
        Total,
        CouponCode,
        CustomerNotes,
        IsGift,
        GiftFromName,
        GiftFromPhone,
        GiftMessage,
        GiftDeliverDate,
        GiftOccasion,
        TrackingNumber,
        CreatedAt,
        UpdatedAt,
        ConfirmedAt,
        ShippedAt,
        DeliveredAt,
    }

    #[derive(DeriveIden)]
    enum OrderItems {
        Table,
        Id,
        OrderId,
        BookId,
        BookTitle,
        BookAuthor,
        BookIsbn,
        Quantity,
        Price,
        Subtotal,
    }

    #[derive(DeriveIden)]
    enum OrderStatusHistory {
        Table,
        Id,
        OrderId,
        Status,
        Notes,
        ChangedBy,
        CreatedAt,
    }
}

mod m20240101_000005_create_coupon_usages_table {
    use super::{timestamp, Coupons, Orders};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000005_create_coupon_usages_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(CouponUsages::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(CouponUsages::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(CouponUsages::CouponId).uuid().not_null())
                        .col(ColumnDef::new(CouponUsages::UserId).uuid().not_null())
                        .col(ColumnDef::new(CouponUsages::OrderId).uuid().not_null())
                        .col(&mut timestamp(CouponUsages::UsedAt))
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_coupon_usages_coupon_id")
                                .from(CouponUsages::Table, CouponUsages::CouponId)
                                .to(Coupons::Table, Coupons::Id),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_coupon_usages_order_id")
                                .from(CouponUsages::Table, CouponUsages::OrderId)
                                .to(Orders::Table, Orders::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_coupon_usages_coupon_user")
                        .table(CouponUsages::Table)
                        .col(CouponUsages::CouponId)
                        .col(CouponUsages::UserId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(CouponUsages::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum CouponUsages {
        Table,
        Id,
        CouponId,
        UserId,
        OrderId,
        UsedAt,
    }
}

mod m20240101_000006_create_payments_table {
    use super::{money, timestamp, Orders};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000006_create_payments_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Payments::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Payments::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Payments::OrderId).uuid().not_null())
                        .col(ColumnDef::new(Payments::PaymentMethod).string_len(32).not_null())
                        .col(
                            ColumnDef::new(Payments::TransactionId)
                                .string_len(100)
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Payments::GatewayReference).string().null())
                        .col(&mut money(Payments::Amount))
                        .col(ColumnDef::new(Payments::Status).string_len(32).not_null())
                        .col(ColumnDef::new(Payments::GatewayResponse).json().null())
                        .col(
                            ColumnDef::new(Payments::ReviewRequired)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(ColumnDef::new(Payments::ReviewReason).text().null())
                        .col(&mut timestamp(Payments::CreatedAt))
                        .col(&mut timestamp(Payments::UpdatedAt))
                        .col(
                            ColumnDef::new(Payments::CompletedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_payments_order_id")
                                .from(Payments::Table, Payments::OrderId)
                                .to(Orders::Table, Orders::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_payments_order_id")
                        .table(Payments::Table)
                        .col(Payments::OrderId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Payments::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Payments {
        Table,
        Id,
        OrderId,
        PaymentMethod,
        TransactionId,
        GatewayReference,
        Amount,
        Status,
        GatewayResponse,
        ReviewRequired,
        ReviewReason,
        CreatedAt,
        UpdatedAt,
        CompletedAt,
    }
}

mod m20240101_000007_create_rental_tables {
    use super::{money, timestamp, Books};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000007_create_rental_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(RentalPlans::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(RentalPlans::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(RentalPlans::Name).string_len(100).not_null())
                        .col(ColumnDef::new(RentalPlans::Days).integer().not_null())
                        .col(
                            ColumnDef::new(RentalPlans::PricePercentage)
                                .decimal_len(5, 2)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RentalPlans::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(RentalPlans::DisplayOrder)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(BookRentals::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(BookRentals::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(BookRentals::RentalNumber)
                                .string_len(32)
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(BookRentals::UserId).uuid().not_null())
                        .col(ColumnDef::new(BookRentals::BookId).uuid().not_null())
                        .col(ColumnDef::new(BookRentals::PlanId).uuid().not_null())
                        .col(&mut money(BookRentals::RentalPrice))
                        .col(&mut money(BookRentals::SecurityDeposit))
                        .col(&mut money(BookRentals::TotalAmount))
                        .col(ColumnDef::new(BookRentals::Status).string_len(32).not_null())
                        .col(
                            ColumnDef::new(BookRentals::PaymentStatus)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(ColumnDef::new(BookRentals::PaymentMethod).string_len(32).null())
                        .col(
                            ColumnDef::new(BookRentals::StartDate)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(BookRentals::DueDate)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(BookRentals::ReturnDate)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(BookRentals::LateFee)
                                .decimal_len(12, 2)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(BookRentals::LateDays)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(BookRentals::RenewalCount)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(BookRentals::CanRenew)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(&mut timestamp(BookRentals::CreatedAt))
                        .col(&mut timestamp(BookRentals::UpdatedAt))
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_book_rentals_book_id")
                                .from(BookRentals::Table, BookRentals::BookId)
                                .to(Books::Table, Books::Id),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_book_rentals_plan_id")
                                .from(BookRentals::Table, BookRentals::PlanId)
                                .to(RentalPlans::Table, RentalPlans::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_book_rentals_user_status")
                        .table(BookRentals::Table)
                        .col(BookRentals::UserId)
                        .col(BookRentals::Status)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(RentalStatusHistory::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(RentalStatusHistory::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(RentalStatusHistory::RentalId).uuid().not_null())
                        .col(
                            ColumnDef::new(RentalStatusHistory::Status)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(ColumnDef::new(RentalStatusHistory::Notes).text().null())
                        .col(&mut timestamp(RentalStatusHistory::CreatedAt))
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_rental_status_history_rental_id")
                                .from(RentalStatusHistory::Table, RentalStatusHistory::RentalId)
                                .to(BookRentals::Table, BookRentals::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(RentalStatusHistory::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(BookRentals::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(RentalPlans::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum RentalPlans {
        Table,
        Id,
        Name,
        Days,
        PricePercentage,
        IsActive,
        DisplayOrder,
    }

    #[derive(DeriveIden)]
    enum BookRentals {
        Table,
        Id,
        RentalNumber,
        UserId,
        BookId,
        PlanId,
        RentalPrice,
        SecurityDeposit,
        TotalAmount,
        Status,
        PaymentStatus,
        PaymentMethod,
        StartDate,
        DueDate,
        ReturnDate,
        LateFee,
        LateDays,
        RenewalCount,
        CanRenew,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum RentalStatusHistory {
        Table,
        Id,
        RentalId,
        Status,
        Notes,
        CreatedAt,
    }
}
