//! Minimal OpenRTB 2.x model flowing through the hook stages.
//!
//! Only the fields the hook engine, the activity infrastructure and the rule
//! engine look at are typed; everything else is preserved in `extra` so a hook
//! that replaces the request never drops data it did not touch. Maps are
//! ordered so serialisation is stable across runs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Bid request as received from the publisher and passed to bidders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BidRequest {
    /// Unique ID of the bid request, provided by the exchange.
    pub id: String,
    #[serde(default)]
    pub imp: Vec<Imp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<Site>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app: Option<App>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<Device>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regs: Option<Regs>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tmax: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext: Option<Value>,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl BidRequest {
    /// Country of the device geo, if supplied.
    #[must_use]
    pub fn device_country(&self) -> Option<&str> {
        self.device
            .as_ref()
            .and_then(|device| device.geo.as_ref())
            .and_then(|geo| geo.country.as_deref())
    }

    /// Global Privacy Control signal from `regs.ext.gpc`.
    #[must_use]
    pub fn gpc(&self) -> Option<&str> {
        self.regs
            .as_ref()
            .and_then(|regs| regs.ext.as_ref())
            .and_then(|ext| ext.gpc.as_deref())
    }

    /// Find an impression by id.
    #[must_use]
    pub fn imp_by_id(&self, imp_id: &str) -> Option<&Imp> {
        self.imp.iter().find(|imp| imp.id == imp_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Imp {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tagid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub banner: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub native: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext: Option<ImpExt>,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Imp {
    /// Bidders configured for this impression under `ext.prebid.bidder`.
    #[must_use]
    pub fn bidders(&self) -> Vec<&str> {
        self.ext
            .as_ref()
            .and_then(|ext| ext.prebid.as_ref())
            .map(|prebid| prebid.bidder.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Mutable access to the bidder map, if present.
    pub fn bidders_mut(&mut self) -> Option<&mut BTreeMap<String, Value>> {
        self.ext
            .as_mut()
            .and_then(|ext| ext.prebid.as_mut())
            .map(|prebid| &mut prebid.bidder)
    }

    /// Media types present on the impression (`banner`, `video`, `native`, `audio`).
    #[must_use]
    pub fn media_types(&self) -> Vec<&'static str> {
        let mut types = Vec::with_capacity(4);
        if self.banner.is_some() {
            types.push("banner");
        }
        if self.video.is_some() {
            types.push("video");
        }
        if self.native.is_some() {
            types.push("native");
        }
        if self.audio.is_some() {
            types.push("audio");
        }
        types
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ImpExt {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prebid: Option<PrebidImpExt>,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PrebidImpExt {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub bidder: BTreeMap<String, Value>,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Site {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<String>,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct App {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct User {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext: Option<Value>,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Regs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext: Option<RegsExt>,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RegsExt {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub us_privacy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpc: Option<String>,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Device {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ua: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geo: Option<Geo>,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Geo {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub geo_type: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Minimal subset of an OpenRTB 2.x bid response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BidResponse {
    pub id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub seatbid: Vec<SeatBid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cur: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext: Option<Value>,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SeatBid {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seat: Option<String>,
    #[serde(default)]
    pub bid: Vec<Bid>,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Bid {
    pub id: String,
    pub impid: String,
    pub price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adm: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crid: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub adomain: Vec<String>,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// A bid returned by one bidder adapter, before it is merged into the response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BidderBid {
    pub bid: Bid,
    /// Media type the adapter reported (`banner`, `video`, ...).
    pub bid_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bid_currency: Option<String>,
}

/// Everything one bidder returned for the auction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BidderResponse {
    pub bidder: String,
    pub bids: Vec<BidderBid>,
    pub response_time_ms: u64,
}

/// Reason a bidder produced no bid for an impression.
///
/// Codes follow the Prebid seat-non-bid convention: `1xx` errors, `2xx` request
/// blocked before the bidder was called, `3xx` response rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum BidRejectionReason {
    NoBid,
    ErrorGeneral,
    ErrorTimedOut,
    ErrorInvalidBidResponse,
    ErrorBidderUnreachable,
    RequestBlockedGeneral,
    RequestBlockedUnsupportedChannel,
    RequestBlockedUnsupportedMediaType,
    RequestBlockedOptimized,
    RequestBlockedPrivacy,
    RequestBlockedUnacceptableCurrency,
    ResponseRejectedGeneral,
    ResponseRejectedBelowFloor,
}

impl BidRejectionReason {
    /// Numeric code reported in `ext.seatnonbid`.
    #[must_use]
    pub fn code(self) -> u16 {
        match self {
            Self::NoBid => 0,
            Self::ErrorGeneral => 100,
            Self::ErrorTimedOut => 101,
            Self::ErrorInvalidBidResponse => 102,
            Self::ErrorBidderUnreachable => 103,
            Self::RequestBlockedGeneral => 200,
            Self::RequestBlockedUnsupportedChannel => 201,
            Self::RequestBlockedUnsupportedMediaType => 202,
            Self::RequestBlockedOptimized => 203,
            Self::RequestBlockedPrivacy => 204,
            Self::RequestBlockedUnacceptableCurrency => 205,
            Self::ResponseRejectedGeneral => 300,
            Self::ResponseRejectedBelowFloor => 301,
        }
    }
}

impl TryFrom<u16> for BidRejectionReason {
    type Error = String;

    fn try_from(code: u16) -> Result<Self, Self::Error> {
        let reason = match code {
            0 => Self::NoBid,
            100 => Self::ErrorGeneral,
            101 => Self::ErrorTimedOut,
            102 => Self::ErrorInvalidBidResponse,
            103 => Self::ErrorBidderUnreachable,
            200 => Self::RequestBlockedGeneral,
            201 => Self::RequestBlockedUnsupportedChannel,
            202 => Self::RequestBlockedUnsupportedMediaType,
            203 => Self::RequestBlockedOptimized,
            204 => Self::RequestBlockedPrivacy,
            205 => Self::RequestBlockedUnacceptableCurrency,
            300 => Self::ResponseRejectedGeneral,
            301 => Self::ResponseRejectedBelowFloor,
            other => return Err(format!("Unknown bid rejection reason code: {other}")),
        };
        Ok(reason)
    }
}

impl From<BidRejectionReason> for u16 {
    fn from(reason: BidRejectionReason) -> Self {
        reason.code()
    }
}

/// One impression a seat did not bid on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonBid {
    #[serde(rename = "impid")]
    pub imp_id: String,
    #[serde(rename = "statuscode")]
    pub status_code: BidRejectionReason,
}

impl NonBid {
    #[must_use]
    pub fn new(imp_id: impl Into<String>, status_code: BidRejectionReason) -> Self {
        Self {
            imp_id: imp_id.into(),
            status_code,
        }
    }
}

/// Non-bid records for one seat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatNonBid {
    pub seat: String,
    #[serde(rename = "nonbid")]
    pub non_bid: Vec<NonBid>,
}

impl SeatNonBid {
    #[must_use]
    pub fn new(seat: impl Into<String>, non_bid: Vec<NonBid>) -> Self {
        Self {
            seat: seat.into(),
            non_bid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bid_request_preserves_unknown_fields() {
        let raw = json!({
            "id": "req-1",
            "imp": [{
                "id": "imp-1",
                "banner": {"w": 300, "h": 250},
                "ext": {"prebid": {"bidder": {"bidderA": {"placement": 1}}}, "gpid": "/1/home"}
            }],
            "source": {"tid": "abc"},
            "regs": {"ext": {"gpc": "1"}},
            "device": {"geo": {"country": "USA", "region": "CA"}}
        });

        let request: BidRequest = serde_json::from_value(raw.clone()).expect("should parse");
        assert_eq!(request.imp[0].bidders(), vec!["bidderA"]);
        assert_eq!(request.imp[0].media_types(), vec!["banner"]);
        assert_eq!(request.gpc(), Some("1"));
        assert_eq!(request.device_country(), Some("USA"));

        let back = serde_json::to_value(&request).expect("should serialize");
        assert_eq!(back["source"], json!({"tid": "abc"}));
        assert_eq!(back["imp"][0]["ext"]["gpid"], json!("/1/home"));
    }

    #[test]
    fn test_bid_rejection_reason_codes() {
        assert_eq!(BidRejectionReason::RequestBlockedGeneral.code(), 200);
        assert_eq!(
            BidRejectionReason::try_from(203),
            Ok(BidRejectionReason::RequestBlockedOptimized)
        );
        assert!(BidRejectionReason::try_from(999).is_err());

        let non_bid = NonBid {
            imp_id: "imp-1".into(),
            status_code: BidRejectionReason::RequestBlockedPrivacy,
        };
        assert_eq!(
            serde_json::to_value(&non_bid).expect("should serialize"),
            json!({"impid": "imp-1", "statuscode": 204})
        );
    }
}
