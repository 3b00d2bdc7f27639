//! Business values flowing through each stage.

use std::collections::BTreeMap;
use std::fmt;

use http::HeaderMap;

use crate::openrtb::{BidRequest, BidResponse, BidderBid, BidderResponse};

/// Value handed to hooks of one stage.
///
/// Hooks only ever see a shared reference; changes are returned as payload
/// update functions and applied by the engine.
pub trait Payload: fmt::Debug + Clone + Send + Sync + 'static {
    /// Bid request carried by this payload, used to derive activity signals.
    fn bid_request(&self) -> Option<&BidRequest> {
        None
    }
}

/// Raw HTTP request as received by the endpoint.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EntrypointPayload {
    pub query_params: BTreeMap<String, String>,
    pub headers: HeaderMap,
    pub body: String,
}

impl Payload for EntrypointPayload {}

/// Bid request before and after the exchange's request processing.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AuctionRequestPayload {
    pub bid_request: BidRequest,
}

impl Payload for AuctionRequestPayload {
    fn bid_request(&self) -> Option<&BidRequest> {
        Some(&self.bid_request)
    }
}

/// Request about to be sent to one bidder.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BidderRequestPayload {
    pub bid_request: BidRequest,
}

impl Payload for BidderRequestPayload {
    fn bid_request(&self) -> Option<&BidRequest> {
        Some(&self.bid_request)
    }
}

/// Bids returned by one bidder.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BidderResponsePayload {
    pub bids: Vec<BidderBid>,
}

impl Payload for BidderResponsePayload {}

/// Every bidder response once all of them have been processed.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AllProcessedBidResponsesPayload {
    pub bid_responses: Vec<BidderResponse>,
}

impl Payload for AllProcessedBidResponsesPayload {}

/// Final OpenRTB response before it is encoded.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AuctionResponsePayload {
    pub bid_response: BidResponse,
}

impl Payload for AuctionResponsePayload {}

/// Encoded HTTP response about to leave the server.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExitpointPayload {
    pub headers: HeaderMap,
    pub body: String,
}

impl Payload for ExitpointPayload {}
