//! Subcommand handlers (§6). Each function owns one CLI verb and talks to
//! the store/transport traits directly; none of this is exercised by the
//! running scheduler process.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use poller_core::{
    fetch_batch_data, map_order_to_webhook_payload, ConnectionRepository, ErpClient,
    ErpClientFactory, RetryQueueRepository, Scheduler, SentOrderRepository, SyncLogRepository,
    WebhookSender,
};
use poller_domain::{CircuitState, ConnectionUpdate, NewConnection, RetryStatusUpdate};

use crate::prompt::{confirm, prompt_with_default};
use crate::App;

pub async fn run(app: &App) -> Result<()> {
    let scheduler = Arc::new(Scheduler::new(
        app.repos.clone(),
        Arc::clone(&app.erp_factory),
        Arc::clone(&app.webhook),
    ));

    scheduler.start().await?;
    tracing::info!("scheduler running, press ctrl-c to stop");

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    tracing::info!("shutdown requested");
    scheduler.stop().await;
    Ok(())
}

pub async fn add(app: &App) -> Result<()> {
    let name = prompt_with_default("name", "")?;
    let odoo_url = prompt_with_default("odoo url", "")?;
    let odoo_db = prompt_with_default("odoo database", "")?;
    let odoo_username = prompt_with_default("odoo username", "")?;
    let odoo_api_key = prompt_with_default("odoo api key", "")?;
    let webhook_url = prompt_with_default("webhook url", "")?;
    let webhook_secret = prompt_with_default("webhook secret (optional)", "")?;
    let poll_interval_seconds: i64 =
        prompt_with_default("poll interval seconds", "60")?.parse().context("poll interval must be a number")?;

    let new = NewConnection {
        name,
        odoo_url,
        odoo_db,
        odoo_username,
        odoo_api_key,
        webhook_url,
        webhook_secret,
        poll_interval_seconds,
    };
    new.validate().map_err(|e| anyhow::anyhow!(e))?;

    let connection = app.repos.connections.create(new).await?;
    println!("created connection {} ({})", connection.id, connection.name);
    Ok(())
}

pub async fn list(app: &App) -> Result<()> {
    let connections = app.repos.connections.list(false).await?;
    if connections.is_empty() {
        println!("no connections configured");
        return Ok(());
    }

    println!("{:<4} {:<20} {:<8} {:<10} {:<12} last_sync_at", "id", "name", "enabled", "circuit", "failures");
    for c in connections {
        println!(
            "{:<4} {:<20} {:<8} {:<10} {:<12} {}",
            c.id,
            c.name,
            c.enabled,
            c.circuit_state,
            c.circuit_failure_count,
            c.last_sync_at.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

pub async fn edit(app: &App, id: i64) -> Result<()> {
    let current = app.repos.connections.get(id).await?.context("connection not found")?;

    let name = prompt_with_default("name", &current.name)?;
    let odoo_url = prompt_with_default("odoo url", &current.odoo_url)?;
    let odoo_db = prompt_with_default("odoo database", &current.odoo_db)?;
    let odoo_username = prompt_with_default("odoo username", &current.odoo_username)?;
    let webhook_url = prompt_with_default("webhook url", &current.webhook_url)?;
    let poll_interval_raw =
        prompt_with_default("poll interval seconds", &current.poll_interval_seconds.to_string())?;
    let poll_interval_seconds: i64 = poll_interval_raw.parse().context("poll interval must be a number")?;

    let update = ConnectionUpdate {
        name: Some(name),
        odoo_url: Some(odoo_url),
        odoo_db: Some(odoo_db),
        odoo_username: Some(odoo_username),
        webhook_url: Some(webhook_url),
        poll_interval_seconds: Some(poll_interval_seconds),
        ..ConnectionUpdate::default()
    };

    let updated = app.repos.connections.update(id, update).await?;
    println!("updated connection {} ({})", updated.id, updated.name);
    Ok(())
}

pub async fn delete(app: &App, id: i64) -> Result<()> {
    let current = app.repos.connections.get(id).await?.context("connection not found")?;
    if !confirm(&format!("delete connection {} ({})?", current.id, current.name))? {
        println!("aborted");
        return Ok(());
    }
    app.repos.connections.delete(id).await?;
    println!("deleted connection {id}");
    Ok(())
}

pub async fn test(app: &App, id: i64) -> Result<()> {
    let connection = app.repos.connections.get(id).await?.context("connection not found")?;
    let erp = app.erp_factory.build(&connection)?;
    match erp.authenticate().await {
        Ok(uid) => println!("authenticated as uid {uid}"),
        Err(err) => println!("authentication failed: {err}"),
    }
    Ok(())
}

pub async fn logs(app: &App, connection_id: Option<i64>, limit: i64) -> Result<()> {
    let Some(id) = connection_id else {
        bail!("--connection is required");
    };
    let logs = app.repos.sync_logs.list_recent(id, limit).await?;
    for log in logs {
        println!(
            "{} {} found={} sent={} failed={} skipped={} error={}",
            log.id,
            log.finished_at,
            log.found,
            log.sent,
            log.failed,
            log.skipped,
            log.error_message.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

pub async fn retries(app: &App, connection_id: Option<i64>) -> Result<()> {
    let Some(id) = connection_id else {
        bail!("--connection is required");
    };
    let items = app.repos.retry_queue.list_by_connection(id).await?;
    for item in items {
        println!(
            "{} order={} status={} attempts={}/{} next_retry_at={} last_error={}",
            item.id,
            item.order_name,
            item.status,
            item.attempts,
            item.max_attempts,
            item.next_retry_at,
            item.last_error.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

pub async fn retry(app: &App, id: i64) -> Result<()> {
    let update = RetryStatusUpdate {
        status: Some(poller_domain::RetryStatus::Pending),
        next_retry_at: Some(Utc::now()),
        ..RetryStatusUpdate::default()
    };
    app.repos.retry_queue.update_status(id, update).await?;
    println!("retry item {id} rescheduled for immediate retry");
    Ok(())
}

pub async fn discard(app: &App, id: i64) -> Result<()> {
    let update = RetryStatusUpdate {
        status: Some(poller_domain::RetryStatus::Discarded),
        last_error: Some("Discarded by operator".to_string()),
        ..RetryStatusUpdate::default()
    };
    app.repos.retry_queue.update_status(id, update).await?;
    println!("retry item {id} discarded");
    Ok(())
}

pub async fn reset_circuit(app: &App, id: i64) -> Result<()> {
    app.repos.connections.update_circuit_state(id, CircuitState::Closed, 0).await?;
    println!("connection {id} circuit reset to closed");
    Ok(())
}

pub async fn send(app: &App, connection_id: i64, last: i64) -> Result<()> {
    let connection =
        app.repos.connections.get(connection_id).await?.context("connection not found")?;
    let recent = app.repos.sent_orders.list_recent(connection_id, last).await?;
    if recent.is_empty() {
        println!("no sent orders to redeliver for connection {connection_id}");
        return Ok(());
    }

    let erp = app.erp_factory.build(&connection)?;
    for sent in recent {
        let orders = erp
            .read("sale.order", &[sent.order_id], poller_domain::constants::ORDER_FIELDS)
            .await?;
        let Some(order) = orders.first() else {
            println!("order {} no longer exists in the erp; skipping", sent.order_id);
            continue;
        };

        let batch = fetch_batch_data(erp.as_ref(), std::slice::from_ref(order)).await?;
        let payload =
            map_order_to_webhook_payload(order, &batch, &connection.odoo_db, connection.id);

        match app.webhook.send(&connection.webhook_url, &payload, &connection.webhook_secret, connection.id).await {
            Ok(()) => println!("redelivered order {} ({})", sent.order_id, payload.order.name),
            Err(err) => println!("failed to redeliver order {}: {err}", sent.order_id),
        }
    }
    Ok(())
}
