//! Geographic information resolved for a request.
//!
//! The OpenRTB `device.geo` object ends up as a [`GeoInfo`], which is what the
//! activity infrastructure matches geo rules against.

use serde::{Deserialize, Serialize};

use crate::openrtb::{BidRequest, Geo};

/// Geographic information attached to a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct GeoInfo {
    /// Country code as supplied upstream (e.g. "USA", "DE").
    pub country: String,
    /// Region code, when known.
    pub region: Option<String>,
}

impl GeoInfo {
    #[must_use]
    pub fn new(country: impl Into<String>, region: Option<String>) -> Self {
        Self {
            country: country.into(),
            region,
        }
    }

    /// Builds a `GeoInfo` from an OpenRTB geo object.
    ///
    /// Returns `None` when the country is absent, since every geo rule needs it.
    #[must_use]
    pub fn from_openrtb(geo: &Geo) -> Option<Self> {
        let country = geo.country.as_deref().filter(|c| !c.is_empty())?;
        Some(Self::new(country, geo.region.clone()))
    }

    /// Geo of the device that sent the bid request.
    #[must_use]
    pub fn from_bid_request(request: &BidRequest) -> Option<Self> {
        request
            .device
            .as_ref()
            .and_then(|device| device.geo.as_ref())
            .and_then(Self::from_openrtb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openrtb::Device;

    #[test]
    fn test_from_bid_request() {
        let request = BidRequest {
            device: Some(Device {
                geo: Some(Geo {
                    country: Some("USA".into()),
                    region: Some("CA".into()),
                    ..Geo::default()
                }),
                ..Device::default()
            }),
            ..BidRequest::default()
        };

        let geo = GeoInfo::from_bid_request(&request).expect("should resolve geo");
        assert_eq!(geo, GeoInfo::new("USA", Some("CA".into())));
        assert!(GeoInfo::from_bid_request(&BidRequest::default()).is_none());
    }

    #[test]
    fn test_missing_country_yields_none() {
        let geo = Geo {
            region: Some("CA".into()),
            ..Geo::default()
        };
        assert!(GeoInfo::from_openrtb(&geo).is_none());

        let empty = Geo {
            country: Some(String::new()),
            ..Geo::default()
        };
        assert!(GeoInfo::from_openrtb(&empty).is_none());
    }
}
