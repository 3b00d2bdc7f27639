//! Schema (condition) functions: each turns the request, or one impression of
//! it, into a string that rule conditions are matched against.

use std::collections::BTreeSet;

use error_stack::Report;
use rand::Rng;
use serde::Deserialize;
use validator::Validate;

use super::config::{parse_args, FunctionConfig};
use super::result::Granularity;
use crate::error::ConfigurationValidationError;
use crate::openrtb::{BidRequest, Imp};

pub const DEVICE_COUNTRY: &str = "deviceCountry";
pub const DEVICE_COUNTRY_IN: &str = "deviceCountryIn";
pub const CHANNEL: &str = "channel";
pub const DOMAIN_IN: &str = "domainIn";
pub const PERCENT: &str = "percent";
pub const AD_UNIT_CODE: &str = "adUnitCode";
pub const AD_UNIT_CODE_IN: &str = "adUnitCodeIn";
pub const MEDIA_TYPE_IN: &str = "mediaTypeIn";

const TRUE: &str = "true";
const FALSE: &str = "false";

#[derive(Debug, Deserialize, Validate)]
struct CountriesArgs {
    #[validate(
        required(message = "'countries' field is required"),
        length(min = 1, message = "'countries' field is required")
    )]
    countries: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Validate)]
struct DomainsArgs {
    #[validate(
        required(message = "'domains' field is required"),
        length(min = 1, message = "'domains' field is required")
    )]
    domains: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Validate)]
struct PercentArgs {
    #[validate(
        required(message = "'pct' field is required"),
        range(max = 100, message = "'pct' must be between 0 and 100")
    )]
    pct: Option<u32>,
}

#[derive(Debug, Deserialize, Validate)]
struct CodesArgs {
    #[validate(
        required(message = "'codes' field is required"),
        length(min = 1, message = "'codes' field is required")
    )]
    codes: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Validate)]
struct TypesArgs {
    #[validate(
        required(message = "'types' field is required"),
        length(min = 1, message = "'types' field is required")
    )]
    types: Option<Vec<String>>,
}

/// A compiled schema function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaFunction {
    /// Device country from `device.geo.country`.
    DeviceCountry,
    DeviceCountryIn(BTreeSet<String>),
    /// `web` for site requests, `app` for app requests.
    Channel,
    DomainIn(BTreeSet<String>),
    /// `true` for a random `pct` percent of evaluations.
    Percent(u32),
    AdUnitCode,
    AdUnitCodeIn(BTreeSet<String>),
    MediaTypeIn(BTreeSet<String>),
}

impl SchemaFunction {
    /// Compiles a schema function from configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationValidationError`] for an unknown function or
    /// invalid arguments.
    pub fn compile(config: &FunctionConfig) -> Result<Self, Report<ConfigurationValidationError>> {
        let name = config.function.as_str();
        let args = config.args.as_ref();
        let function = match name {
            DEVICE_COUNTRY => Self::DeviceCountry,
            DEVICE_COUNTRY_IN => {
                let args: CountriesArgs = parse_args(name, args)?;
                Self::DeviceCountryIn(normalized(args.countries, str::to_ascii_uppercase))
            }
            CHANNEL => Self::Channel,
            DOMAIN_IN => {
                let args: DomainsArgs = parse_args(name, args)?;
                Self::DomainIn(normalized(args.domains, str::to_ascii_lowercase))
            }
            PERCENT => {
                let args: PercentArgs = parse_args(name, args)?;
                Self::Percent(args.pct.unwrap_or_default())
            }
            AD_UNIT_CODE => Self::AdUnitCode,
            AD_UNIT_CODE_IN => {
                let args: CodesArgs = parse_args(name, args)?;
                Self::AdUnitCodeIn(normalized(args.codes, str::to_string))
            }
            MEDIA_TYPE_IN => {
                let args: TypesArgs = parse_args(name, args)?;
                Self::MediaTypeIn(normalized(args.types, str::to_ascii_lowercase))
            }
            unknown => {
                return Err(Report::new(ConfigurationValidationError::new(format!(
                    "Unknown schema function '{unknown}'"
                ))))
            }
        };
        Ok(function)
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::DeviceCountry => DEVICE_COUNTRY,
            Self::DeviceCountryIn(_) => DEVICE_COUNTRY_IN,
            Self::Channel => CHANNEL,
            Self::DomainIn(_) => DOMAIN_IN,
            Self::Percent(_) => PERCENT,
            Self::AdUnitCode => AD_UNIT_CODE,
            Self::AdUnitCodeIn(_) => AD_UNIT_CODE_IN,
            Self::MediaTypeIn(_) => MEDIA_TYPE_IN,
        }
    }

    /// Impression-scoped functions force per-impression evaluation.
    #[must_use]
    pub fn is_imp_scoped(&self) -> bool {
        matches!(
            self,
            Self::AdUnitCode | Self::AdUnitCodeIn(_) | Self::MediaTypeIn(_)
        )
    }

    /// Evaluates the function. Impression-scoped functions yield an empty
    /// string for request granularity or an unknown impression.
    pub fn evaluate<R: Rng>(
        &self,
        request: &BidRequest,
        granularity: &Granularity,
        rng: &mut R,
    ) -> String {
        let imp = match granularity {
            Granularity::Request => None,
            Granularity::Imp(id) => request.imp_by_id(id),
        };

        match self {
            Self::DeviceCountry => request.device_country().unwrap_or_default().to_string(),
            Self::DeviceCountryIn(countries) => flag(
                request
                    .device_country()
                    .is_some_and(|country| countries.contains(&country.to_ascii_uppercase())),
            ),
            Self::Channel => channel(request).to_string(),
            Self::DomainIn(domains) => flag(
                request_domains(request)
                    .any(|domain| domains.contains(&domain.to_ascii_lowercase())),
            ),
            Self::Percent(pct) => flag(rng.gen_range(0..100) < *pct),
            Self::AdUnitCode => imp.map(ad_unit_code).unwrap_or_default().to_string(),
            Self::AdUnitCodeIn(codes) => {
                flag(imp.is_some_and(|imp| codes.contains(ad_unit_code(imp))))
            }
            Self::MediaTypeIn(types) => flag(imp.is_some_and(|imp| {
                imp.media_types()
                    .into_iter()
                    .any(|media_type| types.contains(media_type))
            })),
        }
    }
}

fn normalized(values: Option<Vec<String>>, normalize: fn(&str) -> String) -> BTreeSet<String> {
    values
        .unwrap_or_default()
        .iter()
        .map(|value| normalize(value.as_str()))
        .collect()
}

fn flag(value: bool) -> String {
    if value { TRUE } else { FALSE }.to_string()
}

fn channel(request: &BidRequest) -> &'static str {
    if request.site.is_some() {
        "web"
    } else if request.app.is_some() {
        "app"
    } else {
        ""
    }
}

fn request_domains(request: &BidRequest) -> impl Iterator<Item = &str> {
    let site = request.site.as_ref().and_then(|site| site.domain.as_deref());
    let app = request.app.as_ref().into_iter().flat_map(|app| {
        app.domain
            .as_deref()
            .into_iter()
            .chain(app.bundle.as_deref())
    });
    site.into_iter().chain(app)
}

/// `tagid` when present, the impression id otherwise.
fn ad_unit_code(imp: &Imp) -> &str {
    imp.tagid.as_deref().unwrap_or(imp.id.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openrtb::{App, Device, Geo, Site};
    use rand::rngs::mock::StepRng;
    use serde_json::json;

    fn function(name: &str, args: Option<serde_json::Value>) -> SchemaFunction {
        SchemaFunction::compile(&FunctionConfig {
            function: name.to_string(),
            args,
        })
        .expect("should compile")
    }

    fn request() -> BidRequest {
        BidRequest {
            id: "req".into(),
            imp: vec![
                Imp {
                    id: "imp-1".into(),
                    tagid: Some("top-banner".into()),
                    banner: Some(json!({"w": 300, "h": 250})),
                    ..Imp::default()
                },
                Imp {
                    id: "imp-2".into(),
                    video: Some(json!({})),
                    ..Imp::default()
                },
            ],
            site: Some(Site {
                domain: Some("News.Example.com".into()),
                ..Site::default()
            }),
            device: Some(Device {
                geo: Some(Geo {
                    country: Some("us".into()),
                    ..Geo::default()
                }),
                ..Device::default()
            }),
            ..BidRequest::default()
        }
    }

    #[test]
    fn test_request_scoped_functions() {
        let request = request();
        let mut rng = StepRng::new(0, 1);
        let granularity = Granularity::Request;

        assert_eq!(
            function(DEVICE_COUNTRY, None).evaluate(&request, &granularity, &mut rng),
            "us"
        );
        assert_eq!(
            function(DEVICE_COUNTRY_IN, Some(json!({"countries": ["US", "CA"]})))
                .evaluate(&request, &granularity, &mut rng),
            "true"
        );
        assert_eq!(function(CHANNEL, None).evaluate(&request, &granularity, &mut rng), "web");
        assert_eq!(
            function(DOMAIN_IN, Some(json!({"domains": ["news.example.com"]})))
                .evaluate(&request, &granularity, &mut rng),
            "true"
        );
        assert_eq!(
            function(PERCENT, Some(json!({"pct": 100}))).evaluate(&request, &granularity, &mut rng),
            "true"
        );
        assert_eq!(
            function(PERCENT, Some(json!({"pct": 0}))).evaluate(&request, &granularity, &mut rng),
            "false"
        );
    }

    #[test]
    fn test_app_channel_and_bundle_domain() {
        let request = BidRequest {
            app: Some(App {
                bundle: Some("com.example.game".into()),
                ..App::default()
            }),
            ..BidRequest::default()
        };
        let mut rng = StepRng::new(0, 1);
        assert_eq!(
            function(CHANNEL, None).evaluate(&request, &Granularity::Request, &mut rng),
            "app"
        );
        assert_eq!(
            function(DOMAIN_IN, Some(json!({"domains": ["com.example.game"]})))
                .evaluate(&request, &Granularity::Request, &mut rng),
            "true"
        );
    }

    #[test]
    fn test_imp_scoped_functions() {
        let request = request();
        let mut rng = StepRng::new(0, 1);
        let first = Granularity::Imp("imp-1".into());
        let second = Granularity::Imp("imp-2".into());

        let code = function(AD_UNIT_CODE, None);
        assert!(code.is_imp_scoped());
        assert_eq!(code.evaluate(&request, &first, &mut rng), "top-banner");
        assert_eq!(code.evaluate(&request, &second, &mut rng), "imp-2");
        assert_eq!(code.evaluate(&request, &Granularity::Request, &mut rng), "");

        let code_in = function(AD_UNIT_CODE_IN, Some(json!({"codes": ["top-banner"]})));
        assert_eq!(code_in.evaluate(&request, &first, &mut rng), "true");
        assert_eq!(code_in.evaluate(&request, &second, &mut rng), "false");

        let media = function(MEDIA_TYPE_IN, Some(json!({"types": ["Video"]})));
        assert_eq!(media.evaluate(&request, &first, &mut rng), "false");
        assert_eq!(media.evaluate(&request, &second, &mut rng), "true");
    }

    #[test]
    fn test_invalid_arguments_fail_compilation() {
        let missing = SchemaFunction::compile(&FunctionConfig {
            function: DEVICE_COUNTRY_IN.into(),
            args: None,
        })
        .expect_err("args are required");
        assert_eq!(
            missing.current_context().message,
            "Configuration is required, but not provided"
        );

        let out_of_range = SchemaFunction::compile(&FunctionConfig {
            function: PERCENT.into(),
            args: Some(json!({"pct": 101})),
        })
        .expect_err("pct above 100");
        assert_eq!(
            out_of_range.current_context().message,
            "'pct' must be between 0 and 100"
        );

        let unknown = SchemaFunction::compile(&FunctionConfig {
            function: "moonPhase".into(),
            args: None,
        })
        .expect_err("unknown function");
        assert!(unknown.current_context().message.contains("moonPhase"));
    }
}
