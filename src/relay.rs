use axum::http::HeaderMap;
use tracing::{info, warn};
use validator::Validate;

use crate::descriptor::{RequestDescriptor, ResponseDescriptor};
use crate::error::Result;
use crate::executor::{ClientSettings, OutboundExecutor};
use crate::translator::{to_outbound, to_response_descriptor};

/// Request-translation-and-relay engine.
pub struct Relay {
    executor: OutboundExecutor,
}

impl Relay {
    pub fn new(settings: ClientSettings) -> Result<Self> {
        Ok(Self {
            executor: OutboundExecutor::new(settings)?,
        })
    }

    /// Validate `descriptor`, execute it and describe the outcome.
    pub async fn translate_and_execute(
        &self,
        descriptor: RequestDescriptor,
        inbound: &HeaderMap,
    ) -> Result<ResponseDescriptor> {
        descriptor.validate()?;

        let log = descriptor.log;
        let log_body = descriptor.log_body;
        let tags = descriptor.tags.clone();

        let outbound = to_outbound(descriptor, inbound);
        let raw = match self.executor.execute(&outbound).await {
            Ok(raw) => raw,
            Err(err) => {
                warn!(
                    request_id = %outbound.id,
                    method = %outbound.method,
                    url = %outbound.url,
                    error = %err,
                    "Relay failed"
                );
                return Err(err);
            }
        };
        let response = to_response_descriptor(&outbound, raw);

        if log {
            if log_body {
                info!(
                    request_id = %response.request_id,
                    method = %response.method,
                    url = %response.url,
                    status = response.status_code,
                    tags = ?tags,
                    body = %response.body,
                    "Relayed request"
                );
            } else {
                info!(
                    request_id = %response.request_id,
                    method = %response.method,
                    url = %response.url,
                    status = response.status_code,
                    tags = ?tags,
                    "Relayed request"
                );
            }
        }

        Ok(response)
    }
}
