//! Invocation payloads handed to the activity infrastructure.
//!
//! Every payload identifies the calling component. Geo and GPC are optional
//! capabilities layered on top with [`WithGeo`] and [`WithGpc`], so a call
//! site only supplies what it actually knows:
//!
//! ```ignore
//! let payload = ComponentPayload::new(Component::bidder("bidderA"))
//!     .with_geo(GeoInfo::new("USA", None))
//!     .with_gpc("1");
//! ```

use std::fmt;

use serde_json::{json, Map, Value};

use super::Component;
use crate::geo::GeoInfo;
use crate::openrtb::BidRequest;

/// Geo country/region exposed by a payload.
pub trait GeoCapability {
    fn country(&self) -> &str;
    fn region(&self) -> Option<&str>;
}

/// Global Privacy Control signal exposed by a payload.
pub trait GpcCapability {
    fn gpc(&self) -> &str;
}

/// What the activity rules are evaluated against.
pub trait ActivityInvocationPayload: fmt::Debug + Send + Sync {
    fn component(&self) -> &Component;

    fn as_geo(&self) -> Option<&dyn GeoCapability> {
        None
    }

    fn as_gpc(&self) -> Option<&dyn GpcCapability> {
        None
    }

    /// JSON rendering used by the debug trace.
    fn to_trace_json(&self) -> Value {
        let mut map = Map::new();
        map.insert(
            "componentType".into(),
            json!(self.component().component_type.to_string()),
        );
        map.insert("componentName".into(), json!(self.component().name));
        if let Some(geo) = self.as_geo() {
            map.insert("country".into(), json!(geo.country()));
            if let Some(region) = geo.region() {
                map.insert("region".into(), json!(region));
            }
        }
        if let Some(gpc) = self.as_gpc() {
            map.insert("gpc".into(), json!(gpc.gpc()));
        }
        Value::Object(map)
    }
}

/// Bare component identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentPayload {
    component: Component,
}

impl ComponentPayload {
    #[must_use]
    pub fn new(component: Component) -> Self {
        Self { component }
    }

    /// Builds the richest payload a bid request supports: device geo and
    /// `regs.ext.gpc` are attached only when the request carries them.
    #[must_use]
    pub fn for_bid_request(
        component: Component,
        request: &BidRequest,
    ) -> Box<dyn ActivityInvocationPayload> {
        Self::for_signals(
            component,
            GeoInfo::from_bid_request(request),
            request.gpc().map(str::to_string),
        )
    }

    /// Builds a payload from already resolved geo and GPC signals.
    #[must_use]
    pub fn for_signals(
        component: Component,
        geo: Option<GeoInfo>,
        gpc: Option<String>,
    ) -> Box<dyn ActivityInvocationPayload> {
        let base = Self::new(component);
        match (geo, gpc) {
            (Some(geo), Some(gpc)) => Box::new(base.with_geo(geo).with_gpc(gpc)),
            (Some(geo), None) => Box::new(base.with_geo(geo)),
            (None, Some(gpc)) => Box::new(base.with_gpc(gpc)),
            (None, None) => Box::new(base),
        }
    }
}

impl ActivityInvocationPayload for ComponentPayload {
    fn component(&self) -> &Component {
        &self.component
    }
}

/// Adds geo to an inner payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithGeo<P> {
    inner: P,
    geo: GeoInfo,
}

impl<P: ActivityInvocationPayload> ActivityInvocationPayload for WithGeo<P> {
    fn component(&self) -> &Component {
        self.inner.component()
    }

    fn as_geo(&self) -> Option<&dyn GeoCapability> {
        Some(self)
    }

    fn as_gpc(&self) -> Option<&dyn GpcCapability> {
        self.inner.as_gpc()
    }
}

impl<P> GeoCapability for WithGeo<P> {
    fn country(&self) -> &str {
        &self.geo.country
    }

    fn region(&self) -> Option<&str> {
        self.geo.region.as_deref()
    }
}

/// Adds a GPC signal to an inner payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithGpc<P> {
    inner: P,
    gpc: String,
}

impl<P: ActivityInvocationPayload> ActivityInvocationPayload for WithGpc<P> {
    fn component(&self) -> &Component {
        self.inner.component()
    }

    fn as_geo(&self) -> Option<&dyn GeoCapability> {
        self.inner.as_geo()
    }

    fn as_gpc(&self) -> Option<&dyn GpcCapability> {
        Some(self)
    }
}

impl<P> GpcCapability for WithGpc<P> {
    fn gpc(&self) -> &str {
        &self.gpc
    }
}

/// Composition helpers available on every sized payload.
pub trait PayloadBuilder: ActivityInvocationPayload + Sized {
    fn with_geo(self, geo: GeoInfo) -> WithGeo<Self> {
        WithGeo { inner: self, geo }
    }

    fn with_gpc(self, gpc: impl Into<String>) -> WithGpc<Self> {
        WithGpc {
            inner: self,
            gpc: gpc.into(),
        }
    }
}

impl<P: ActivityInvocationPayload> PayloadBuilder for P {}
