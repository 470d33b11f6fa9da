use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_customers_table::Migration),
            Box::new(m20240101_000002_create_orders_tables::Migration),
            Box::new(m20240101_000003_create_inquiries_table::Migration),
            Box::new(m20240101_000004_create_quotes_tables::Migration),
            Box::new(m20240101_000005_create_users_and_push_tables::Migration),
            Box::new(m20240101_000006_create_webhook_events_table::Migration),
            Box::new(m20240215_000007_add_quote_line_pallet_quantity::Migration),
        ]
    }
}

mod m20240101_000001_create_customers_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000001_create_customers_table"
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
                        .col(ColumnDef::new(Customers::Email).string().not_null())
                        .col(ColumnDef::new(Customers::FirstName).string().null())
                        .col(ColumnDef::new(Customers::LastName).string().null())
                        .col(ColumnDef::new(Customers::Company).string().null())
                        .col(ColumnDef::new(Customers::Phone).string().null())
                        .col(ColumnDef::new(Customers::Address1).string().null())
                        .col(ColumnDef::new(Customers::Address2).string().null())
                        .col(ColumnDef::new(Customers::City).string().null())
                        .col(ColumnDef::new(Customers::State).string().null())
                        .col(ColumnDef::new(Customers::PostalCode).string().null())
                        .col(ColumnDef::new(Customers::Country).string().null())
                        .col(ColumnDef::new(Customers::BusinessUnit).string_len(16).null())
                        .col(
                            ColumnDef::new(Customers::Sources)
                                .string()
                                .not_null()
                                .default(""),
                        )
                        .col(ColumnDef::new(Customers::EcommerceCustomerId).string().null())
                        .col(ColumnDef::new(Customers::AccountingCustomerId).string().null())
                        .col(
                            ColumnDef::new(Customers::AcceptsMarketing)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(ColumnDef::new(Customers::Notes).text().null())
                        .col(
                            ColumnDef::new(Customers::FirstSeenAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Customers::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Customers::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // One customer per normalized email
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("ux_customers_email")
                        .table(Customers::Table)
                        .col(Customers::Email)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_customers_business_unit")
                        .table(Customers::Table)
                        .col(Customers::BusinessUnit)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Customers::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Customers {
        Table,
        Id,
        Email,
        FirstName,
        LastName,
        Company,
        Phone,
        Address1,
        Address2,
        City,
        State,
        PostalCode,
        Country,
        BusinessUnit,
        Sources,
        EcommerceCustomerId,
        AccountingCustomerId,
        AcceptsMarketing,
        Notes,
        FirstSeenAt,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000002_create_orders_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000002_create_orders_tables"
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
                        .col(ColumnDef::new(Orders::Source).string_len(16).not_null())
                        .col(ColumnDef::new(Orders::ExternalId).string().not_null())
                        .col(ColumnDef::new(Orders::OrderNumber).string().not_null())
                        .col(ColumnDef::new(Orders::CustomerId).uuid().null())
                        .col(ColumnDef::new(Orders::CustomerEmail).string().not_null())
                        .col(ColumnDef::new(Orders::CustomerName).string().null())
                        .col(ColumnDef::new(Orders::BusinessUnit).string_len(16).not_null())
                        .col(ColumnDef::new(Orders::Status).string_len(16).not_null())
                        .col(
                            ColumnDef::new(Orders::OrderDate)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::Currency)
                                .string_len(3)
                                .not_null()
                                .default("USD"),
                        )
                        .col(money(Orders::Subtotal))
                        .col(money(Orders::Tax))
                        .col(money(Orders::Shipping))
                        .col(money(Orders::Total))
                        .col(ColumnDef::new(Orders::Notes).text().null())
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
                                .to(Customers::Table, Customers::Id)
                                .on_delete(ForeignKeyAction::SetNull),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("ux_orders_source_external_id")
                        .table(Orders::Table)
                        .col(Orders::Source)
                        .col(Orders::ExternalId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            for (name, col) in [
                ("idx_orders_customer_email", Orders::CustomerEmail),
                ("idx_orders_order_date", Orders::OrderDate),
                ("idx_orders_business_unit", Orders::BusinessUnit),
            ] {
                manager
                    .create_index(
                        Index::create()
                            .if_not_exists()
                            .name(name)
                            .table(Orders::Table)
                            .col(col)
                            .to_owned(),
                    )
                    .await?;
            }

            manager
                .create_table(
                    Table::create()
                        .table(OrderLineItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OrderLineItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderLineItems::OrderId).uuid().not_null())
                        .col(ColumnDef::new(OrderLineItems::Sku).string().null())
                        .col(ColumnDef::new(OrderLineItems::Description).string().not_null())
                        .col(money(OrderLineItems::Quantity))
                        .col(ColumnDef::new(OrderLineItems::Unit).string_len(8).not_null())
                        .col(
                            ColumnDef::new(OrderLineItems::PalletQuantity)
                                .decimal_len(16, 4)
                                .null(),
                        )
                        .col(money(OrderLineItems::UnitPrice))
                        .col(money(OrderLineItems::Total))
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_order_line_items_order_id")
                                .from(OrderLineItems::Table, OrderLineItems::OrderId)
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
                        .name("idx_order_line_items_order_id")
                        .table(OrderLineItems::Table)
                        .col(OrderLineItems::OrderId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OrderLineItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    fn money<T: IntoIden>(col: T) -> ColumnDef {
        ColumnDef::new(col)
            .decimal_len(16, 4)
            .not_null()
            .default(0)
            .to_owned()
    }

    #[derive(DeriveIden)]
    enum Orders {
        Table,
        Id,
        Source,
        ExternalId,
        OrderNumber,
        CustomerId,
        CustomerEmail,
        CustomerName,
        BusinessUnit,
        Status,
        OrderDate,
        Currency,
        Subtotal,
        Tax,
        Shipping,
        Total,
        Notes,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum OrderLineItems {
        Table,
        Id,
        OrderId,
        Sku,
        Description,
        Quantity,
        Unit,
        PalletQuantity,
        UnitPrice,
        Total,
    }

    #[derive(DeriveIden)]
    enum Customers {
        Table,
        Id,
    }
}

mod m20240101_000003_create_inquiries_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000003_create_inquiries_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Inquiries::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Inquiries::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Inquiries::Name).string().not_null())
                        .col(ColumnDef::new(Inquiries::Email).string().not_null())
                        .col(ColumnDef::new(Inquiries::Phone).string().null())
                        .col(ColumnDef::new(Inquiries::Company).string().null())
                        .col(ColumnDef::new(Inquiries::Message).text().not_null())
                        .col(
                            ColumnDef::new(Inquiries::Source)
                                .string_len(32)
                                .not_null()
                                .default("website"),
                        )
                        .col(ColumnDef::new(Inquiries::Status).string_len(16).not_null())
                        .col(ColumnDef::new(Inquiries::AssignedTo).uuid().null())
                        .col(ColumnDef::new(Inquiries::CustomerId).uuid().null())
                        .col(
                            ColumnDef::new(Inquiries::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Inquiries::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_inquiries_customer_id")
                                .from(Inquiries::Table, Inquiries::CustomerId)
                                .to(Customers::Table, Customers::Id)
                                .on_delete(ForeignKeyAction::SetNull),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_inquiries_status")
                        .table(Inquiries::Table)
                        .col(Inquiries::Status)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Inquiries::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Inquiries {
        Table,
        Id,
        Name,
        Email,
        Phone,
        Company,
        Message,
        Source,
        Status,
        AssignedTo,
        CustomerId,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum Customers {
        Table,
        Id,
    }
}

mod m20240101_000004_create_quotes_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000004_create_quotes_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Quotes::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Quotes::Id).uuid().primary_key().not_null())
                        .col(
                            ColumnDef::new(Quotes::QuoteNumber)
                                .string_len(32)
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Quotes::CustomerId).uuid().null())
                        .col(ColumnDef::new(Quotes::CustomerEmail).string().not_null())
                        .col(ColumnDef::new(Quotes::CustomerName).string().null())
                        .col(ColumnDef::new(Quotes::BusinessUnit).string_len(16).not_null())
                        .col(ColumnDef::new(Quotes::Status).string_len(16).not_null())
                        .col(ColumnDef::new(Quotes::Notes).text().null())
                        .col(
                            ColumnDef::new(Quotes::ValidUntil)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Quotes::Subtotal)
                                .decimal_len(16, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Quotes::Total)
                                .decimal_len(16, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Quotes::ExternalDraftId).string().null())
                        .col(ColumnDef::new(Quotes::ConvertedOrderId).uuid().null())
                        .col(ColumnDef::new(Quotes::CreatedBy).uuid().null())
                        .col(
                            ColumnDef::new(Quotes::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Quotes::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_quotes_customer_id")
                                .from(Quotes::Table, Quotes::CustomerId)
                                .to(Customers::Table, Customers::Id)
                                .on_delete(ForeignKeyAction::SetNull),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(QuoteLineItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(QuoteLineItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(QuoteLineItems::QuoteId).uuid().not_null())
                        .col(ColumnDef::new(QuoteLineItems::Sku).string().null())
                        .col(ColumnDef::new(QuoteLineItems::Description).string().not_null())
                        .col(
                            ColumnDef::new(QuoteLineItems::Quantity)
                                .decimal_len(16, 4)
                                .not_null(),
                        )
                        .col(ColumnDef::new(QuoteLineItems::Unit).string_len(8).not_null())
                        .col(
                            ColumnDef::new(QuoteLineItems::UnitPrice)
                                .decimal_len(16, 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(QuoteLineItems::Total)
                                .decimal_len(16, 4)
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_quote_line_items_quote_id")
                                .from(QuoteLineItems::Table, QuoteLineItems::QuoteId)
                                .to(Quotes::Table, Quotes::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_quote_line_items_quote_id")
                        .table(QuoteLineItems::Table)
                        .col(QuoteLineItems::QuoteId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(QuoteLineItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Quotes::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Quotes {
        Table,
        Id,
        QuoteNumber,
        CustomerId,
        CustomerEmail,
        CustomerName,
        BusinessUnit,
        Status,
        Notes,
        ValidUntil,
        Subtotal,
        Total,
        ExternalDraftId,
        ConvertedOrderId,
        CreatedBy,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum QuoteLineItems {
        Table,
        Id,
        QuoteId,
        Sku,
        Description,
        Quantity,
        Unit,
        UnitPrice,
        Total,
    }

    #[derive(DeriveIden)]
    enum Customers {
        Table,
        Id,
    }
}

mod m20240101_000005_create_users_and_push_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000005_create_users_and_push_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Users::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Users::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Users::Name).string().not_null())
                        .col(
                            ColumnDef::new(Users::Email)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Users::PasswordHash).string().not_null())
                        .col(ColumnDef::new(Users::Role).string_len(16).not_null())
                        .col(
                            ColumnDef::new(Users::Active)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(Users::LastLoginAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Users::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Users::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(PushSubscriptions::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PushSubscriptions::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PushSubscriptions::UserId).uuid().not_null())
                        .col(
                            ColumnDef::new(PushSubscriptions::Endpoint)
                                .text()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(PushSubscriptions::P256dh).string().not_null())
                        .col(ColumnDef::new(PushSubscriptions::Auth).string().not_null())
                        .col(
                            ColumnDef::new(PushSubscriptions::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_push_subscriptions_user_id")
                                .from(PushSubscriptions::Table, PushSubscriptions::UserId)
                                .to(Users::Table, Users::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(PushSubscriptions::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Users::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Users {
        Table,
        Id,
        Name,
        Email,
        PasswordHash,
        Role,
        Active,
        LastLoginAt,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum PushSubscriptions {
        Table,
        Id,
        UserId,
        Endpoint,
        P256dh,
        Auth,
        CreatedAt,
    }
}

mod m20240101_000006_create_webhook_events_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000006_create_webhook_events_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(WebhookEvents::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(WebhookEvents::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(WebhookEvents::Provider).string_len(32).not_null())
                        .col(ColumnDef::new(WebhookEvents::EventId).string().not_null())
                        .col(ColumnDef::new(WebhookEvents::EventType).string().not_null())
                        .col(
                            ColumnDef::new(WebhookEvents::ReceivedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("ux_webhook_events_provider_event_id")
                        .table(WebhookEvents::Table)
                        .col(WebhookEvents::Provider)
                        .col(WebhookEvents::EventId)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(WebhookEvents::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum WebhookEvents {
        Table,
        Id,
        Provider,
        EventId,
        EventType,
        ReceivedAt,
    }
}

mod m20240215_000007_add_quote_line_pallet_quantity {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240215_000007_add_quote_line_pallet_quantity"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .alter_table(
                    Table::alter()
                        .table(QuoteLineItems::Table)
                        .add_column(
                            ColumnDef::new(QuoteLineItems::PalletQuantity)
                                .decimal_len(16, 4)
                                .null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .alter_table(
                    Table::alter()
                        .table(QuoteLineItems::Table)
                        .drop_column(QuoteLineItems::PalletQuantity)
                        .to_owned(),
                )
                .await
        }
    }

    #[derive(DeriveIden)]
    enum QuoteLineItems {
        Table,
        PalletQuantity,
    }
}
