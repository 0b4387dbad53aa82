//! Concrete source adapters.
//!
//! | Adapter | Tier | Needs postcode | Upstream |
//! |---------|------|----------------|----------|
//! | [`LandRegistryAdapter`] | official | yes | HM Land Registry Price Paid Data |
//! | [`FloodRiskAdapter`] | official | yes | postcodes.io + Environment Agency |
//! | [`ScansanAdapter`] | official | yes | Scansan valuation API |
//! | [`PortalAdapter`] | scraped / browser | no | Rightmove, Zoopla, OnTheMarket |

mod flood_risk;
mod land_registry;
mod portal;
mod render;
mod scansan;

use std::ops::ControlFlow;

pub use flood_risk::FloodRiskAdapter;
pub use land_registry::LandRegistryAdapter;
pub use portal::{PortalAdapter, PortalProfile};
pub use render::RenderServiceClient;
pub use scansan::ScansanAdapter;

use crate::adapter::{AdapterDescriptor, AdapterFault, SourceResult};
use crate::deadline::{Deadline, Interrupted};
use crate::http_client::{HttpClient, HttpError, HttpErrorKind, HttpRequest, HttpResponse};

/// Maps a transport error to a result; connection faults propagate.
pub(crate) fn settle_transport(
    descriptor: &AdapterDescriptor,
    error: HttpError,
) -> Result<SourceResult, AdapterFault> {
    match error.kind() {
        HttpErrorKind::Timeout => Ok(SourceResult::timeout(descriptor, error.message())),
        HttpErrorKind::Connect => Err(AdapterFault::Transport(error)),
        HttpErrorKind::Other => Ok(SourceResult::protocol_error(descriptor, error.message())),
    }
}

pub(crate) fn settle_interrupted(
    descriptor: &AdapterDescriptor,
    interrupted: Interrupted,
) -> SourceResult {
    SourceResult::timeout(descriptor, interrupted.to_string())
}

/// Status mapping shared by the JSON APIs.
fn settle_status(descriptor: &AdapterDescriptor, response: &HttpResponse) -> Option<SourceResult> {
    match response.status {
        200..=299 => None,
        404 | 410 => Some(SourceResult::not_found(
            descriptor,
            format!("upstream returned {}", response.status),
        )),
        401 | 403 | 429 => Some(SourceResult::blocked(
            descriptor,
            format!("upstream refused access with {}", response.status),
        )),
        status => Some(SourceResult::protocol_error(
            descriptor,
            format!("unexpected upstream status {status}"),
        )),
    }
}

/// Runs one API request under `deadline`. `Break` carries an already-settled result.
pub(crate) async fn exchange(
    http: &dyn HttpClient,
    request: HttpRequest,
    descriptor: &AdapterDescriptor,
    deadline: &Deadline,
) -> Result<ControlFlow<SourceResult, HttpResponse>, AdapterFault> {
    let request = request.with_timeout(deadline.remaining());
    match deadline.run(http.execute(request)).await {
        Err(interrupted) => Ok(ControlFlow::Break(settle_interrupted(descriptor, interrupted))),
        Ok(Err(error)) => settle_transport(descriptor, error).map(ControlFlow::Break),
        Ok(Ok(response)) => Ok(match settle_status(descriptor, &response) {
            Some(settled) => ControlFlow::Break(settled),
            None => ControlFlow::Continue(response),
        }),
    }
}
