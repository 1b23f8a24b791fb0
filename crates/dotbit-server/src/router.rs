//! Request router shared by the UDP and TCP serve loops.

use async_trait::async_trait;
use hickory_proto::rr::{LowerName, Name};
use hickory_server::authority::{AuthorityObject, Catalog};
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};
use std::sync::Arc;

/// Routes every query to the resolution engine.
///
/// The engine is registered at the root, so it sees all names and decides
/// itself what to answer or refuse. Cloning is cheap; all clones share one
/// read-only catalog, so both transports dispatch into it without locking.
#[derive(Clone)]
pub struct QueryRouter {
    catalog: Arc<Catalog>,
}

impl QueryRouter {
    /// Register `engine` as the sole handler for all names.
    pub fn new(engine: Arc<dyn AuthorityObject>) -> Self {
        let mut catalog = Catalog::new();
        catalog.upsert(LowerName::from(Name::root()), vec![engine]);
        Self {
            catalog: Arc::new(catalog),
        }
    }
}

#[async_trait]
impl RequestHandler for QueryRouter {
    async fn handle_request<R: ResponseHandler>(
        &self,
        request: &Request,
        response_handle: R,
    ) -> ResponseInfo {
        self.catalog.handle_request(request, response_handle).await
    }
}
