use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240301_000001_create_catalog_tables::Migration),
            Box::new(m20240301_000002_create_stock_ledger_tables::Migration),
            Box::new(m20240301_000003_create_repair_order_tables::Migration),
            Box::new(m20240301_000004_create_invoicing_tables::Migration),
            Box::new(m20240301_000005_create_stock_count_tables::Migration),
            Box::new(m20240301_000006_create_purchase_order_tables::Migration),
        ]
    }
}

// Migration implementations

mod m20240301_000001_create_catalog_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000001_create_catalog_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(InventoryItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(InventoryItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryItems::Sku)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(InventoryItems::Name).string().not_null())
                        .col(
                            ColumnDef::new(InventoryItems::UnitCost)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(InventoryItems::UnitPrice)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(InventoryItems::Status).string().not_null())
                        .col(
                            ColumnDef::new(InventoryItems::ArchivedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(InventoryItems::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryItems::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Warehouses::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Warehouses::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Warehouses::Code)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Warehouses::Name).string().not_null())
                        .col(ColumnDef::new(Warehouses::Status).string().not_null())
                        .col(
                            ColumnDef::new(Warehouses::ArchivedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Warehouses::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Warehouses::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Warehouses::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(InventoryItems::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum InventoryItems {
        Table,
        Id,
        Sku,
        Name,
        UnitCost,
        UnitPrice,
        Status,
        ArchivedAt,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum Warehouses {
        Table,
        Id,
        Code,
        Name,
        Status,
        ArchivedAt,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000002_create_stock_ledger_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000002_create_stock_ledger_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(StockLevels::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(StockLevels::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockLevels::ItemId).uuid().not_null())
                        .col(ColumnDef::new(StockLevels::WarehouseId).uuid().not_null())
                        .col(
                            ColumnDef::new(StockLevels::Quantity)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(StockLevels::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockLevels::UpdatedAt)
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
                        .name("idx_stock_levels_item_warehouse")
                        .table(StockLevels::Table)
                        .col(StockLevels::ItemId)
                        .col(StockLevels::WarehouseId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(StockMovements::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(StockMovements::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockMovements::ItemId).uuid().not_null())
                        .col(
                            ColumnDef::new(StockMovements::WarehouseId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockMovements::Quantity).integer().not_null())
                        .col(
                            ColumnDef::new(StockMovements::MovementType)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockMovements::Reason).string().null())
                        .col(ColumnDef::new(StockMovements::ReferenceType).string().null())
                        .col(ColumnDef::new(StockMovements::ReferenceId).uuid().null())
                        .col(ColumnDef::new(StockMovements::PerformedBy).uuid().null())
                        .col(
                            ColumnDef::new(StockMovements::CreatedAt)
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
                        .name("idx_stock_movements_item_warehouse")
                        .table(StockMovements::Table)
                        .col(StockMovements::ItemId)
                        .col(StockMovements::WarehouseId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_movements_reference")
                        .table(StockMovements::Table)
                        .col(StockMovements::ReferenceType)
                        .col(StockMovements::ReferenceId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(StockMovements::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(StockLevels::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum StockLevels {
        Table,
        Id,
        ItemId,
        WarehouseId,
        Quantity,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum StockMovements {
        Table,
        Id,
        ItemId,
        WarehouseId,
        Quantity,
        MovementType,
        Reason,
        ReferenceType,
        ReferenceId,
        PerformedBy,
        CreatedAt,
    }
}

mod m20240301_000003_create_repair_order_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000003_create_repair_order_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(RepairOrders::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(RepairOrders::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RepairOrders::OrderNumber)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(RepairOrders::CustomerId).uuid().not_null())
                        .col(ColumnDef::new(RepairOrders::Device).string().not_null())
                        .col(
                            ColumnDef::new(RepairOrders::ReportedProblem)
                                .string()
                                .null(),
                        )
                        .col(ColumnDef::new(RepairOrders::Status).string().not_null())
                        .col(ColumnDef::new(RepairOrders::TechnicianId).uuid().null())
                        .col(
                            ColumnDef::new(RepairOrders::EstimatedCost)
                                .decimal()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(RepairOrders::ActualCost)
                                .decimal()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(RepairOrders::DeliveredAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(ColumnDef::new(RepairOrders::DeliveredBy).uuid().null())
                        .col(
                            ColumnDef::new(RepairOrders::DeliverySignature)
                                .string()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(RepairOrders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RepairOrders::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(RepairStatusLogs::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(RepairStatusLogs::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RepairStatusLogs::RepairOrderId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(RepairStatusLogs::FromStatus).string().null())
                        .col(
                            ColumnDef::new(RepairStatusLogs::ToStatus)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(RepairStatusLogs::ChangedBy).uuid().null())
                        .col(ColumnDef::new(RepairStatusLogs::Note).string().null())
                        .col(
                            ColumnDef::new(RepairStatusLogs::CreatedAt)
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
                        .name("idx_repair_status_logs_order")
                        .table(RepairStatusLogs::Table)
                        .col(RepairStatusLogs::RepairOrderId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(RepairStatusLogs::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(RepairOrders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum RepairOrders {
        Table,
        Id,
        OrderNumber,
        CustomerId,
        Device,
        ReportedProblem,
        Status,
        TechnicianId,
        EstimatedCost,
        ActualCost,
        DeliveredAt,
        DeliveredBy,
        DeliverySignature,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum RepairStatusLogs {
        Table,
        Id,
        RepairOrderId,
        FromStatus,
        ToStatus,
        ChangedBy,
        Note,
        CreatedAt,
    }
}

mod m20240301_000004_create_invoicing_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000004_create_invoicing_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Invoices::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Invoices::Id).uuid().primary_key().not_null())
                        .col(
                            ColumnDef::new(Invoices::InvoiceNumber)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Invoices::RepairOrderId).uuid().not_null())
                        .col(
                            ColumnDef::new(Invoices::Subtotal)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Invoices::TaxAmount)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Invoices::ShippingAmount)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Invoices::DiscountAmount)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Invoices::TotalAmount)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Invoices::AmountPaid)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Invoices::Status).string().not_null())
                        .col(ColumnDef::new(Invoices::CreatedBy).uuid().null())
                        .col(
                            ColumnDef::new(Invoices::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Invoices::UpdatedAt)
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
                        .name("idx_invoices_repair_order")
                        .table(Invoices::Table)
                        .col(Invoices::RepairOrderId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(InvoiceLineItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(InvoiceLineItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InvoiceLineItems::InvoiceId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InvoiceLineItems::Description)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InvoiceLineItems::Quantity)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InvoiceLineItems::UnitPrice)
                                .decimal()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InvoiceLineItems::LineTotal)
                                .decimal()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InvoiceLineItems::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Payments::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Payments::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Payments::InvoiceId).uuid().not_null())
                        .col(
                            ColumnDef::new(Payments::Amount)
                                .decimal()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Payments::Method).string().not_null())
                        .col(ColumnDef::new(Payments::Reference).string().null())
                        .col(ColumnDef::new(Payments::ReceivedBy).uuid().null())
                        .col(ColumnDef::new(Payments::IdempotencyKey).string().null())
                        .col(
                            ColumnDef::new(Payments::CreatedAt)
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
                        .name("idx_payments_invoice")
                        .table(Payments::Table)
                        .col(Payments::InvoiceId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_payments_idempotency_key")
                        .table(Payments::Table)
                        .col(Payments::IdempotencyKey)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Payments::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(InvoiceLineItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Invoices::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Invoices {
        Table,
        Id,
        InvoiceNumber,
        RepairOrderId,
        Subtotal,
        TaxAmount,
        ShippingAmount,
        DiscountAmount,
        TotalAmount,
        AmountPaid,
        Status,
        CreatedBy,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum InvoiceLineItems {
        Table,
        Id,
        InvoiceId,
        Description,
        Quantity,
        UnitPrice,
        LineTotal,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    enum Payments {
        Table,
        Id,
        InvoiceId,
        Amount,
        Method,
        Reference,
        ReceivedBy,
        IdempotencyKey,
        CreatedAt,
    }
}

mod m20240301_000005_create_stock_count_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000005_create_stock_count_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(StockCounts::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(StockCounts::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockCounts::CountNumber)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(StockCounts::WarehouseId).uuid().not_null())
                        .col(ColumnDef::new(StockCounts::Status).string().not_null())
                        .col(
                            ColumnDef::new(StockCounts::CountDate)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(StockCounts::StartedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(ColumnDef::new(StockCounts::ReviewedBy).uuid().null())
                        .col(ColumnDef::new(StockCounts::ApprovedBy).uuid().null())
                        .col(ColumnDef::new(StockCounts::AdjustedBy).uuid().null())
                        .col(
                            ColumnDef::new(StockCounts::CompletedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(ColumnDef::new(StockCounts::Notes).string().null())
                        .col(
                            ColumnDef::new(StockCounts::TotalItems)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(StockCounts::Discrepancies)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(StockCounts::TotalValueDifference)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(StockCounts::CreatedBy).uuid().null())
                        .col(
                            ColumnDef::new(StockCounts::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockCounts::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(StockCountItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(StockCountItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockCountItems::StockCountId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockCountItems::ItemId).uuid().not_null())
                        .col(
                            ColumnDef::new(StockCountItems::SystemQuantity)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockCountItems::CountedQuantity)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockCountItems::Variance)
                                .integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockCountItems::CountedBy).uuid().null())
                        .col(ColumnDef::new(StockCountItems::Notes).string().null())
                        .col(
                            ColumnDef::new(StockCountItems::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockCountItems::UpdatedAt)
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
                        .name("idx_stock_count_items_count_item")
                        .table(StockCountItems::Table)
                        .col(StockCountItems::StockCountId)
                        .col(StockCountItems::ItemId)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(StockCountItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(StockCounts::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum StockCounts {
        Table,
        Id,
        CountNumber,
        WarehouseId,
        Status,
        CountDate,
        StartedAt,
        ReviewedBy,
        ApprovedBy,
        AdjustedBy,
        CompletedAt,
        Notes,
        TotalItems,
        Discrepancies,
        TotalValueDifference,
        CreatedBy,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum StockCountItems {
        Table,
        Id,
        StockCountId,
        ItemId,
        SystemQuantity,
        CountedQuantity,
        Variance,
        CountedBy,
        Notes,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000006_create_purchase_order_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000006_create_purchase_order_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(PurchaseOrders::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PurchaseOrders::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrders::PoNumber)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(PurchaseOrders::VendorId).uuid().not_null())
                        .col(
                            ColumnDef::new(PurchaseOrders::WarehouseId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrders::ApprovalStatus)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrders::FulfillmentStatus)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PurchaseOrders::ApprovedBy).uuid().null())
                        .col(
                            ColumnDef::new(PurchaseOrders::ApprovedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(ColumnDef::new(PurchaseOrders::RejectedBy).uuid().null())
                        .col(
                            ColumnDef::new(PurchaseOrders::RejectedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrders::RejectionReason)
                                .string()
                                .null(),
                        )
                        .col(ColumnDef::new(PurchaseOrders::Notes).string().null())
                        .col(ColumnDef::new(PurchaseOrders::CreatedBy).uuid().null())
                        .col(
                            ColumnDef::new(PurchaseOrders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrders::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(PurchaseOrderItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PurchaseOrderItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrderItems::PurchaseOrderId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PurchaseOrderItems::ItemId).uuid().not_null())
                        .col(
                            ColumnDef::new(PurchaseOrderItems::OrderedQuantity)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrderItems::ReceivedQuantity)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrderItems::UnitCost)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrderItems::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrderItems::UpdatedAt)
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
                        .name("idx_purchase_order_items_order")
                        .table(PurchaseOrderItems::Table)
                        .col(PurchaseOrderItems::PurchaseOrderId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(PurchaseOrderItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(PurchaseOrders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum PurchaseOrders {
        Table,
        Id,
        PoNumber,
        VendorId,
        WarehouseId,
        ApprovalStatus,
        FulfillmentStatus,
        ApprovedBy,
        ApprovedAt,
        RejectedBy,
        RejectedAt,
        RejectionReason,
        Notes,
        CreatedBy,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum PurchaseOrderItems {
        Table,
        Id,
        PurchaseOrderId,
        ItemId,
        OrderedQuantity,
        ReceivedQuantity,
        UnitCost,
        CreatedAt,
        UpdatedAt,
    }
}
