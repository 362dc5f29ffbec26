//! Operational HTTP surface for the alert pipeline.
//!
//! Routes:
//! - `GET  /health`
//! - `GET  /api/scheduler/status`, `POST /api/scheduler/trigger`
//! - `GET  /api/alerts/history`, `POST /api/alerts/history/cleanup`
//! - `POST /api/devices`, `DELETE /api/devices/{id}`
//! - `GET|PUT /api/devices/{id}/preferences`

pub mod routes;
pub mod state;
