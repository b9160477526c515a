//! # SmartyBridge - Serial to MQTT Bridge Node
//!
//! SmartyBridge turns a small Linux board into an unattended bridge: bytes written by an
//! attached device on a UART are coalesced into messages and published to an MQTT
//! broker, while the broker can order the node to restart.
//!
//! ## Features
//!
//! - **Link Bring-up**: Joins the upstream wireless network, or falls back to a local access point.
//! - **Presence Protocol**: Last-will, logon and logoff announcements on a control topic.
//! - **Burst Coalescing**: Bytes that arrive in quick succession are published as one message.
//! - **Remote Reset**: An exact `reset` directive on the control topic restarts the node.
//! - **Fault Recovery**: Any fault disables the attached device, re-enables the local console,
//!   and restarts the node after a cooldown.
//! - **Async Design**: Built with Tokio; the whole node runs on a single task.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use smartybridge::config::Config;
//! use smartybridge::identity::NodeIdentity;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let identity = NodeIdentity::detect(config.node.unique_id.as_deref())?;
//!     println!("client id: {}{}", identity.client_id(), config.node.client_suffix);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`config`] - Configuration loading and validation
//! - [`identity`] - Hardware-derived node identity
//! - [`link`] - Wireless bring-up with local access point fallback
//! - [`mqtt`] - broker transport on the `rumqttc` client, TCP or TLS
//! - [`session`] - Broker session and presence protocol
//! - [`serial`] - Serial source abstraction and UART implementation
//! - [`forward`] - The forwarding loop
//! - [`hardware`] - Enable line, console switch and restart
//! - [`supervisor`] - Fault supervision
//! - [`node`] - Startup sequence
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │ FaultSupervisor │ ← Interrupt, reset and fault handling
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │      Node       │ ← link → delay → session → loop
//! └─────────────────┘
//!          │
//! ┌─────────────────┐     ┌─────────────────┐
//! │ ForwardingLoop  │ ──► │  SessionClient  │ ← MQTT over TCP/TLS
//! └─────────────────┘     └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │  SerialSource   │ ← UART
//! └─────────────────┘
//! ```

pub mod config;
pub mod forward;
pub mod hardware;
pub mod identity;
pub mod link;
pub mod logutil;
pub mod metrics;
pub mod mqtt;
pub mod node;
pub mod serial;
pub mod session;
pub mod supervisor;
