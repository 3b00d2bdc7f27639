//! Fixed stage catalog and the typed markers binding each stage to its payload.

use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::payload::{
    AllProcessedBidResponsesPayload, AuctionRequestPayload, AuctionResponsePayload,
    BidderRequestPayload, BidderResponsePayload, EntrypointPayload, ExitpointPayload,
};
use crate::activity::Activity;

/// Point in request processing where hooks run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Entrypoint,
    RawAuctionRequest,
    ProcessedAuctionRequest,
    BidderRequest,
    RawBidderResponse,
    ProcessedBidderResponse,
    AllProcessedBidResponses,
    AuctionResponse,
    Exitpoint,
}

impl Stage {
    pub const ALL: [Stage; 9] = [
        Stage::Entrypoint,
        Stage::RawAuctionRequest,
        Stage::ProcessedAuctionRequest,
        Stage::BidderRequest,
        Stage::RawBidderResponse,
        Stage::ProcessedBidderResponse,
        Stage::AllProcessedBidResponses,
        Stage::AuctionResponse,
        Stage::Exitpoint,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Entrypoint => "entrypoint",
            Self::RawAuctionRequest => "raw-auction-request",
            Self::ProcessedAuctionRequest => "processed-auction-request",
            Self::BidderRequest => "bidder-request",
            Self::RawBidderResponse => "raw-bidder-response",
            Self::ProcessedBidderResponse => "processed-bidder-response",
            Self::AllProcessedBidResponses => "all-processed-bid-responses",
            Self::AuctionResponse => "auction-response",
            Self::Exitpoint => "exitpoint",
        }
    }

    /// Whether a hook may reject the stage. Stages after bidder responses are
    /// processed can no longer be rejected.
    #[must_use]
    pub fn is_reject_supported(self) -> bool {
        !matches!(
            self,
            Self::AllProcessedBidResponses | Self::AuctionResponse | Self::Exitpoint
        )
    }

    /// Activity gating hook invocation at this stage, if any.
    #[must_use]
    pub fn privacy_activity(self) -> Option<Activity> {
        match self {
            Self::RawAuctionRequest | Self::ProcessedAuctionRequest => Some(Activity::EnrichUfpd),
            Self::BidderRequest => Some(Activity::TransmitUfpd),
            _ => None,
        }
    }

    /// Entity reported in the stage outcome when it is not a bidder.
    #[must_use]
    pub fn default_entity(self) -> &'static str {
        match self {
            Self::Entrypoint => "http-request",
            Self::RawAuctionRequest | Self::ProcessedAuctionRequest => "auction-request",
            Self::BidderRequest | Self::RawBidderResponse | Self::ProcessedBidderResponse => {
                "bidder"
            }
            Self::AllProcessedBidResponses => "all-processed-bid-responses",
            Self::AuctionResponse => "auction-response",
            Self::Exitpoint => "http-response",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| format!("Unknown stage: {s}"))
    }
}

/// A stage bound at compile time to the payload type flowing through it.
pub struct StageWithHookType<P> {
    stage: Stage,
    _payload: PhantomData<fn() -> P>,
}

impl<P> StageWithHookType<P> {
    const fn new(stage: Stage) -> Self {
        Self {
            stage,
            _payload: PhantomData,
        }
    }

    #[must_use]
    pub fn stage(&self) -> Stage {
        self.stage
    }
}

impl<P> Clone for StageWithHookType<P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P> Copy for StageWithHookType<P> {}

impl<P> fmt::Debug for StageWithHookType<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StageWithHookType").field(&self.stage).finish()
    }
}

pub const ENTRYPOINT: StageWithHookType<EntrypointPayload> =
    StageWithHookType::new(Stage::Entrypoint);
pub const RAW_AUCTION_REQUEST: StageWithHookType<AuctionRequestPayload> =
    StageWithHookType::new(Stage::RawAuctionRequest);
pub const PROCESSED_AUCTION_REQUEST: StageWithHookType<AuctionRequestPayload> =
    StageWithHookType::new(Stage::ProcessedAuctionRequest);
pub const BIDDER_REQUEST: StageWithHookType<BidderRequestPayload> =
    StageWithHookType::new(Stage::BidderRequest);
pub const RAW_BIDDER_RESPONSE: StageWithHookType<BidderResponsePayload> =
    StageWithHookType::new(Stage::RawBidderResponse);
pub const PROCESSED_BIDDER_RESPONSE: StageWithHookType<BidderResponsePayload> =
    StageWithHookType::new(Stage::ProcessedBidderResponse);
pub const ALL_PROCESSED_BID_RESPONSES: StageWithHookType<AllProcessedBidResponsesPayload> =
    StageWithHookType::new(Stage::AllProcessedBidResponses);
pub const AUCTION_RESPONSE: StageWithHookType<AuctionResponsePayload> =
    StageWithHookType::new(Stage::AuctionResponse);
pub const EXITPOINT: StageWithHookType<ExitpointPayload> =
    StageWithHookType::new(Stage::Exitpoint);
