//! Command arguments and handlers.
//!
//! Operators address things by their business keys (SKU, batch code,
//! order number); handlers resolve those to ids and call the
//! [`FulfillmentService`].

use anyhow::{anyhow, bail, Context as _, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, Subcommand};

use crate::config::StockwellConfig;
use crate::output::Output;
use stockwell_core::{
    ActorId, Batch, CustomerId, MovementQuery, NewBatch, NewOrder, NewOrderLine, Order,
    OrderItemRequest, OrderRequest, OrderStatus, OrderWithLines, PageRequest, Product,
};
use stockwell_db::{Database, FulfillmentService};

// =============================================================================
// Arguments
// =============================================================================

#[derive(Debug, Args)]
pub struct ActorArg {
    /// Who is acting; recorded on every movement
    #[arg(long, env = "STOCKWELL_ACTOR", default_value = "cli")]
    pub actor: String,
}

#[derive(Debug, Subcommand)]
pub enum ProductCommand {
    /// Register a product
    Add { sku: String, name: String },

    /// List active products
    List {
        #[arg(long, default_value_t = 100)]
        limit: u32,
    },

    /// Stop receiving and allocating a product
    Deactivate { sku: String },
}

#[derive(Debug, Args)]
pub struct ReceiveArgs {
    /// Product SKU
    #[arg(long)]
    pub sku: String,

    /// Unique lot code
    #[arg(long = "batch")]
    pub batch_code: String,

    /// Expiry date, YYYY-MM-DD
    #[arg(long)]
    pub expiry: NaiveDate,

    #[arg(long)]
    pub quantity: i64,

    /// Unit cost in cents
    #[arg(long = "cost")]
    pub unit_cost_cents: i64,

    /// Unit price in cents
    #[arg(long = "price")]
    pub unit_price_cents: i64,

    #[command(flatten)]
    pub actor: ActorArg,
}

#[derive(Debug, Args)]
pub struct AllocateArgs {
    pub sku: String,
    pub quantity: i64,
}

#[derive(Debug, Args)]
pub struct OrderHeaderArgs {
    /// Customer id (defaults to the walk-in guest)
    #[arg(long)]
    pub customer: Option<String>,

    /// Order discount in basis points (1000 = 10%)
    #[arg(long = "discount-bps", default_value_t = 0)]
    pub discount_bps: u32,

    #[arg(long = "shipping-cents", default_value_t = 0)]
    pub shipping_fee_cents: i64,

    /// Fixed total; skips the computed one
    #[arg(long = "total-cents")]
    pub total_override_cents: Option<i64>,

    #[command(flatten)]
    pub actor: ActorArg,
}

impl OrderHeaderArgs {
    fn customer_id(&self) -> CustomerId {
        self.customer
            .as_deref()
            .map(CustomerId::from)
            .unwrap_or_else(CustomerId::guest)
    }
}

#[derive(Debug, Subcommand)]
pub enum OrderCommand {
    /// Allocate FEFO, create and reserve (or sell, with --pos) in one step
    Place {
        /// SKU=QTY, repeatable
        #[arg(long = "item", value_parser = parse_pair, required = true)]
        items: Vec<(String, i64)>,

        /// Point-of-sale checkout: sell directly instead of reserving
        #[arg(long)]
        pos: bool,

        #[command(flatten)]
        header: OrderHeaderArgs,
    },

    /// Create a draft order from explicit batch lines
    Create {
        /// BATCH_CODE=QTY, repeatable
        #[arg(long = "line", value_parser = parse_pair, required = true)]
        lines: Vec<(String, i64)>,

        #[command(flatten)]
        header: OrderHeaderArgs,
    },

    /// Move an order to a new status
    Transition {
        order_number: String,
        status: OrderStatus,

        #[command(flatten)]
        actor: ActorArg,
    },

    /// Show an order with its lines
    Show { order_number: String },

    /// List orders, newest first
    List {
        #[arg(long)]
        status: Option<OrderStatus>,

        #[arg(long)]
        limit: Option<u32>,

        #[arg(long, default_value_t = 0)]
        offset: u32,
    },
}

#[derive(Debug, Args)]
pub struct LedgerArgs {
    pub batch_code: String,

    /// Replay the movement log and compare it with the stored buckets
    #[arg(long)]
    pub audit: bool,
}

#[derive(Debug, Args)]
pub struct HistoryArgs {
    /// History of one batch
    #[arg(long, conflicts_with = "sku", required_unless_present = "sku")]
    pub batch: Option<String>,

    /// History of every batch of a product
    #[arg(long)]
    pub sku: Option<String>,

    /// Inclusive lower bound, RFC 3339
    #[arg(long)]
    pub from: Option<DateTime<Utc>>,

    /// Exclusive upper bound, RFC 3339
    #[arg(long)]
    pub to: Option<DateTime<Utc>>,

    #[arg(long)]
    pub limit: Option<u32>,

    #[arg(long, default_value_t = 0)]
    pub offset: u32,
}

/// Parses `KEY=QTY`.
fn parse_pair(raw: &str) -> std::result::Result<(String, i64), String> {
    let (key, qty) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=QTY, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing key in '{raw}'"));
    }
    let qty = qty
        .trim()
        .parse::<i64>()
        .map_err(|_| format!("quantity in '{raw}' is not a whole number"))?;
    Ok((key.to_string(), qty))
}

// =============================================================================
// Context
// =============================================================================

/// Execution context for CLI commands.
pub struct Context {
    pub db: Database,
    pub service: FulfillmentService,
    pub config: StockwellConfig,
    pub output: Output,
}

impl Context {
    pub async fn open(config: StockwellConfig, output: Output) -> Result<Self> {
        let db = Database::new(config.db_config())
            .await
            .with_context(|| format!("Failed to open database {}", config.database_path.display()))?;

        let mut service = db.fulfillment_with(config.retry_policy());
        if let Some(date) = config.business_date {
            service = service.business_date(date);
        }

        Ok(Self {
            db,
            service,
            config,
            output,
        })
    }

    async fn product(&self, sku: &str) -> Result<Product> {
        self.db
            .products()
            .get_by_sku(sku)
            .await?
            .ok_or_else(|| anyhow!("No product with SKU {sku}"))
    }

    async fn batch(&self, batch_code: &str) -> Result<Batch> {
        self.db
            .batches()
            .get_by_code(batch_code)
            .await?
            .ok_or_else(|| anyhow!("No batch with code {batch_code}"))
    }

    async fn order(&self, order_number: &str) -> Result<Order> {
        self.db
            .orders()
            .get_by_number(order_number)
            .await?
            .ok_or_else(|| anyhow!("No order {order_number}"))
    }
}

// =============================================================================
// Handlers
// =============================================================================

pub async fn product(command: ProductCommand, ctx: &Context) -> Result<()> {
    let repo = ctx.db.products();
    match command {
        ProductCommand::Add { sku, name } => {
            let product = repo.create(&sku, &name).await?;
            if !ctx.output.json(&product)? {
                ctx.output.success(&format!("Product {} created", product.sku));
                ctx.output.kv("id", &product.id);
                ctx.output.kv("name", &product.name);
            }
        }
        ProductCommand::List { limit } => {
            let products = repo.list_active(limit).await?;
            if !ctx.output.json(&products)? {
                ctx.output.header("Active products");
                for product in &products {
                    ctx.output.table_row(&[&product.sku, &product.name], &[16, 40]);
                }
            }
        }
        ProductCommand::Deactivate { sku } => {
            let product = ctx.product(&sku).await?;
            repo.set_active(&product.id, false).await?;
            ctx.output.success(&format!("Product {sku} deactivated"));
        }
    }
    Ok(())
}

pub async fn receive(args: ReceiveArgs, ctx: &Context) -> Result<()> {
    let product = ctx.product(&args.sku).await?;
    let new_batch = NewBatch {
        batch_code: args.batch_code,
        product_id: product.id,
        expiry_date: args.expiry,
        unit_cost_cents: args.unit_cost_cents,
        unit_price_cents: args.unit_price_cents,
        quantity: args.quantity,
    };

    let (batch, entry) = ctx
        .service
        .receive_batch(&new_batch, &ActorId::from(args.actor.actor))
        .await?;

    if !ctx.output.json(&serde_json::json!({ "batch": batch, "ledger": entry }))? {
        ctx.output.success(&format!("Received batch {}", batch.batch_code));
        ctx.output.kv("product", &args.sku);
        ctx.output.kv("expiry", batch.expiry_date);
        ctx.output.kv("on shelf", entry.quantity_on_shelf);
        ctx.output.kv("unit price", batch.unit_price());
    }
    Ok(())
}

pub async fn allocate(args: AllocateArgs, ctx: &Context) -> Result<()> {
    let product = ctx.product(&args.sku).await?;
    let plan = ctx.service.allocate(&product.id, args.quantity).await?;

    if ctx.output.json(&plan)? {
        return Ok(());
    }

    ctx.output.header(&format!("FEFO plan for {} x {}", args.quantity, args.sku));
    ctx.output.table_row(&["BATCH", "EXPIRY", "QTY", "PRICE"], &[20, 10, 6, 10]);
    for allocation in &plan {
        let batch = ctx.db.batches().get_by_id(&allocation.batch_id).await?;
        let (code, expiry) = batch
            .map(|b| (b.batch_code, b.expiry_date.to_string()))
            .unwrap_or_else(|| (allocation.batch_id.to_string(), String::new()));
        ctx.output.table_row(
            &[
                &code,
                &expiry,
                &allocation.quantity.to_string(),
                &stockwell_core::Money::from_cents(allocation.unit_price_cents).to_string(),
            ],
            &[20, 10, 6, 10],
        );
    }
    ctx.output.info("Nothing was reserved.");
    Ok(())
}

pub async fn order(command: OrderCommand, ctx: &Context) -> Result<()> {
    match command {
        OrderCommand::Place { items, pos, header } => {
            let mut requested = Vec::with_capacity(items.len());
            for (sku, quantity) in items {
                let product = ctx.product(&sku).await?;
                requested.push(OrderItemRequest {
                    product_id: product.id,
                    quantity,
                });
            }

            let request = OrderRequest {
                customer_id: header.customer_id(),
                actor_id: ActorId::from(header.actor.actor),
                items: requested,
                discount_bps: header.discount_bps,
                shipping_fee_cents: header.shipping_fee_cents,
                total_override_cents: header.total_override_cents,
            };
            let target = if pos {
                OrderStatus::Delivered
            } else {
                OrderStatus::Pending
            };

            let placed = ctx.service.place_order(&request, target).await?;
            if !ctx.output.json(&placed)? {
                ctx.output.success(&format!(
                    "Order {} placed ({})",
                    placed.order.order_number, placed.order.status
                ));
                render_order(ctx, &placed).await?;
            }
        }
        OrderCommand::Create { lines, header } => {
            let mut bound = Vec::with_capacity(lines.len());
            for (batch_code, quantity) in lines {
                let batch = ctx.batch(&batch_code).await?;
                bound.push(NewOrderLine {
                    product_id: batch.product_id,
                    batch_id: batch.id,
                    quantity,
                    unit_price_cents: batch.unit_price_cents,
                });
            }

            let new_order = NewOrder {
                customer_id: header.customer_id(),
                actor_id: ActorId::from(header.actor.actor),
                lines: bound,
                discount_bps: header.discount_bps,
                shipping_fee_cents: header.shipping_fee_cents,
                total_override_cents: header.total_override_cents,
            };

            let order = ctx.service.create_order(&new_order).await?;
            let created = ctx.service.get_order(&order.id).await?;
            if !ctx.output.json(&created)? {
                ctx.output.success(&format!("Draft order {} created", order.order_number));
                render_order(ctx, &created).await?;
            }
        }
        OrderCommand::Transition {
            order_number,
            status,
            actor,
        } => {
            let current = ctx.order(&order_number).await?;
            let updated = ctx
                .service
                .transition_order(&current.id, status, &ActorId::from(actor.actor))
                .await?;
            if !ctx.output.json(&updated)? {
                ctx.output.success(&format!(
                    "Order {} moved {} -> {}",
                    updated.order_number, current.status, updated.status
                ));
                ctx.output.kv("payment", updated.payment_status);
            }
        }
        OrderCommand::Show { order_number } => {
            let found = ctx.order(&order_number).await?;
            let full = ctx.service.get_order(&found.id).await?;
            if !ctx.output.json(&full)? {
                ctx.output.header(&format!("Order {}", full.order.order_number));
                render_order(ctx, &full).await?;
            }
        }
        OrderCommand::List {
            status,
            limit,
            offset,
        } => {
            let page = PageRequest::new(offset, ctx.config.page_size(limit));
            let orders = ctx.db.orders().list(status, page).await?;
            if !ctx.output.json(&orders)? {
                ctx.output.header(&format!("Orders ({} total)", orders.total));
                for order in &orders.items {
                    ctx.output.table_row(
                        &[
                            &order.order_number,
                            order.status.as_str(),
                            &order.total().to_string(),
                            &order.created_at.format("%Y-%m-%d %H:%M").to_string(),
                        ],
                        &[12, 10, 10, 16],
                    );
                }
                if let Some(next) = orders.next_offset() {
                    ctx.output.info(&format!("More with --offset {next}"));
                }
            }
        }
    }
    Ok(())
}

async fn render_order(ctx: &Context, order: &OrderWithLines) -> Result<()> {
    let header = &order.order;
    ctx.output.kv("status", header.status);
    ctx.output.kv("payment", header.payment_status);
    ctx.output.kv("customer", &header.customer_id);
    ctx.output.kv("total", header.total());
    ctx.output.table_row(&["BATCH", "QTY", "UNIT", "LINE"], &[20, 6, 10, 10]);
    for line in &order.lines {
        let code = ctx
            .db
            .batches()
            .get_by_id(&line.batch_id)
            .await?
            .map(|b| b.batch_code)
            .unwrap_or_else(|| line.batch_id.to_string());
        ctx.output.table_row(
            &[
                &code,
                &line.quantity.to_string(),
                &line.unit_price().to_string(),
                &line
                    .line_total()
                    .map(|total| total.to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ],
            &[20, 6, 10, 10],
        );
    }
    Ok(())
}

pub async fn ledger(args: LedgerArgs, ctx: &Context) -> Result<()> {
    let batch = ctx.batch(&args.batch_code).await?;

    if args.audit {
        let audit = ctx.service.audit_batch(&batch.id).await?;
        if !ctx.output.json(&audit)? {
            ctx.output.header(&format!("Audit of {}", batch.batch_code));
            ctx.output.kv("movements", audit.movement_count);
            ctx.output.kv(
                "stored",
                format!("shelf {} / reserved {}", audit.stored.quantity_on_shelf, audit.stored.quantity_reserved),
            );
            ctx.output.kv(
                "replayed",
                format!("shelf {} / reserved {}", audit.replayed.quantity_on_shelf, audit.replayed.quantity_reserved),
            );
        }
        if !audit.consistent {
            bail!("Ledger of batch {} does not match its movement log", batch.batch_code);
        }
        return Ok(());
    }

    let entry = ctx.service.get_ledger(&batch.id).await?;
    if !ctx.output.json(&entry)? {
        ctx.output.header(&format!("Batch {}", batch.batch_code));
        ctx.output.kv("expiry", batch.expiry_date);
        ctx.output.kv("on shelf", entry.quantity_on_shelf);
        ctx.output.kv("reserved", entry.quantity_reserved);
        ctx.output.kv("on hand", entry.quantity_on_hand());
        ctx.output.kv("version", entry.version);
    }
    Ok(())
}

pub async fn history(args: HistoryArgs, ctx: &Context) -> Result<()> {
    let (label, query) = match (&args.batch, &args.sku) {
        (Some(code), _) => (code.clone(), MovementQuery::for_batch(ctx.batch(code).await?.id)),
        (None, Some(sku)) => (sku.clone(), MovementQuery::for_product(ctx.product(sku).await?.id)),
        (None, None) => bail!("Either --batch or --sku is required"),
    };
    let query = query
        .between(args.from, args.to)
        .page(PageRequest::new(args.offset, ctx.config.page_size(args.limit)));

    let page = ctx.service.movement_history(&query).await?;
    if ctx.output.json(&page)? {
        return Ok(());
    }

    ctx.output.header(&format!("Movements of {} ({} total)", label, page.total));
    for movement in &page.items {
        ctx.output.table_row(
            &[
                &movement.seq.to_string(),
                &movement.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                &movement.movement_type.to_string(),
                &format!("{:+}", movement.quantity),
                movement.operation.as_str(),
                movement.actor_id.as_str(),
                &movement.reason,
            ],
            &[6, 19, 3, 6, 18, 12, 0],
        );
    }
    if let Some(next) = page.next_offset() {
        ctx.output.info(&format!("More with --offset {next}"));
    }
    Ok(())
}

pub async fn stock(sku: String, ctx: &Context) -> Result<()> {
    let product = ctx.product(&sku).await?;
    let summary = ctx.service.product_stock(&product.id).await?;
    let allocatable: i64 = ctx
        .db
        .batches()
        .availability(&product.id, ctx.service.today())
        .await?
        .iter()
        .map(|b| b.quantity_on_shelf)
        .sum();

    if ctx
        .output
        .json(&serde_json::json!({ "summary": summary, "allocatable": allocatable }))?
    {
        return Ok(());
    }

    ctx.output.header(&format!("Stock of {} ({})", product.sku, product.name));
    ctx.output.kv("batches", summary.batch_count);
    ctx.output.kv("on shelf", summary.quantity_on_shelf);
    ctx.output.kv("reserved", summary.quantity_reserved);
    ctx.output.kv("on hand", summary.quantity_on_hand());
    ctx.output.kv("allocatable", allocatable);

    let batches = ctx.db.batches().list_for_product(&product.id).await?;
    if batches.is_empty() {
        return Ok(());
    }
    let ledger = ctx.db.ledger().for_product(&product.id).await?;
    let today = ctx.service.today();

    ctx.output.header("Batches (FEFO order)");
    let widths = [16, 12, 8, 9, 8];
    ctx.output.table_row(&["BATCH", "EXPIRY", "SHELF", "RESERVED", ""], &widths);
    for batch in &batches {
        let (shelf, reserved) = ledger
            .iter()
            .find(|entry| entry.batch_id == batch.id)
            .map(|entry| (entry.quantity_on_shelf, entry.quantity_reserved))
            .unwrap_or_default();
        let expiry = batch.expiry_date.to_string();
        let shelf = shelf.to_string();
        let reserved = reserved.to_string();
        let flag = if batch.is_expired(today) { "expired" } else { "" };
        ctx.output
            .table_row(&[&batch.batch_code, &expiry, &shelf, &reserved, flag], &widths);
    }
    Ok(())
}
