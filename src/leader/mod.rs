//! Leader Module
//!
//! Everything the elected coordinator does on behalf of clients: fan a query
//! out to every live worker and merge the answers, place uploads on the
//! least-loaded worker, and locate documents for download.
//!
//! ## Submodules
//! - **`coordinator`**: `QueryCoordinator` scatter-gather and placement logic.
//! - **`client`**: The `WorkerClient` seam and its HTTP implementation.
//! - **`handlers`**: Role-gated Axum handlers.
//! - **`protocol`**: Client-facing endpoints and DTOs.

pub mod client;
pub mod coordinator;
pub mod handlers;
pub mod protocol;

#[cfg(test)]
mod tests;
