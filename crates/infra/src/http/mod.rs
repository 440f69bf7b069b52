//! Outbound transports: the ERP JSON-RPC client and the webhook sender.

pub mod erp_client;
pub mod webhook;

pub use erp_client::{JsonRpcErpClient, JsonRpcErpClientFactory};
pub use webhook::ReqwestWebhookSender;
