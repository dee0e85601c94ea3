//! Page requests and the modes that order their dispatch.

use std::fmt;

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

/// Kind of page a request generates.
///
/// Modes double as dispatch phases: hub pages are generated before the leaf
/// pages that link to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "bulk_page_mode", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum PageMode {
    ServiceHub,
    ServiceCity,
    CityHub,
}

impl PageMode {
    /// All modes in dispatch order.
    pub const ALL: [PageMode; 3] = [PageMode::ServiceHub, PageMode::ServiceCity, PageMode::CityHub];

    /// Position in the dispatch order (0 runs first).
    pub fn phase_order(&self) -> usize {
        match self {
            PageMode::ServiceHub => 0,
            PageMode::ServiceCity => 1,
            PageMode::CityHub => 2,
        }
    }

    /// Modes dispatched after this one.
    pub fn downstream(&self) -> &'static [PageMode] {
        &Self::ALL[self.phase_order() + 1..]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PageMode::ServiceHub => "service_hub",
            PageMode::ServiceCity => "service_city",
            PageMode::CityHub => "city_hub",
        }
    }
}

impl fmt::Display for PageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One page-generation request, as submitted by the client.
///
/// This is the same shape the single-page generation endpoint accepts, so the
/// generation service sees identical input for bulk and individual pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct PageRequest {
    pub mode: PageMode,

    // service_city
    #[builder(default, setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[builder(default, setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[builder(default, setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    // Hubs
    #[builder(default, setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hub_key: Option<String>,
    #[builder(default, setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hub_label: Option<String>,
    #[builder(default, setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hub_slug: Option<String>,
    #[builder(default, setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city_slug: Option<String>,
    #[builder(default, setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vertical: Option<String>,
    #[builder(default)]
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services_for_hub: Vec<String>,

    // Business / contact
    #[builder(default, setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_name: Option<String>,
    #[builder(default, setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[builder(default, setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[builder(default, setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[builder(default, setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cta_text: Option<String>,
    #[builder(default, setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_area_label: Option<String>,
}

impl PageRequest {
    /// A service page for one city (convenience constructor).
    pub fn service_city(service: &str, city: &str, state: &str) -> Self {
        Self::builder()
            .mode(PageMode::ServiceCity)
            .service(service)
            .city(city)
            .state(state)
            .build()
    }

    /// A service hub page (convenience constructor).
    pub fn service_hub(hub_key: &str, hub_label: &str) -> Self {
        Self::builder()
            .mode(PageMode::ServiceHub)
            .hub_key(hub_key)
            .hub_label(hub_label)
            .build()
    }

    /// A city hub page (convenience constructor).
    pub fn city_hub(city_slug: &str) -> Self {
        Self::builder()
            .mode(PageMode::CityHub)
            .city_slug(city_slug)
            .build()
    }

    /// Names of fields the request's mode requires but which are blank.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        match self.mode {
            PageMode::ServiceHub => {
                if !has_text(&self.hub_key) {
                    missing.push("hub_key");
                }
            }
            PageMode::CityHub => {
                // A city slug can be derived from city + state.
                if !has_text(&self.city_slug) {
                    if !has_text(&self.city) {
                        missing.push("city_slug");
                    } else if !has_text(&self.state) {
                        missing.push("state");
                    }
                }
            }
            PageMode::ServiceCity => {
                if !has_text(&self.service) {
                    missing.push("service");
                }
                if !has_text(&self.city) {
                    missing.push("city");
                }
                if !has_text(&self.state) {
                    missing.push("state");
                }
            }
        }
        missing
    }

    /// Check that every field the mode requires is present.
    pub fn validate(&self) -> Result<(), String> {
        let missing = self.missing_fields();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(format!(
                "{} page is missing required fields: {}",
                self.mode,
                missing.join(", ")
            ))
        }
    }
}

fn has_text(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modes_are_ordered_hub_first() {
        assert!(PageMode::ServiceHub.phase_order() < PageMode::ServiceCity.phase_order());
        assert!(PageMode::ServiceCity.phase_order() < PageMode::CityHub.phase_order());
        assert_eq!(
            PageMode::ServiceHub.downstream(),
            &[PageMode::ServiceCity, PageMode::CityHub]
        );
        assert!(PageMode::CityHub.downstream().is_empty());
    }

    #[test]
    fn mode_serializes_snake_case() {
        let json = serde_json::to_string(&PageMode::ServiceCity).unwrap();
        assert_eq!(json, "\"service_city\"");
    }

    #[test]
    fn request_omits_empty_fields() {
        let req = PageRequest::service_city("Roof Repair", "Tulsa", "OK");
        let json = serde_json::to_value(&req).unwrap();

        assert_eq!(json["mode"], "service_city");
        assert_eq!(json["service"], "Roof Repair");
        assert!(json.get("hub_key").is_none());
        assert!(json.get("services_for_hub").is_none());
    }

    #[test]
    fn service_city_requires_triple() {
        let req = PageRequest::builder()
            .mode(PageMode::ServiceCity)
            .service("Roof Repair")
            .city("  ")
            .build();

        assert_eq!(req.missing_fields(), vec!["city", "state"]);
        assert!(req.validate().is_err());
    }

    #[test]
    fn city_hub_accepts_city_and_state_without_slug() {
        let req = PageRequest::builder()
            .mode(PageMode::CityHub)
            .city("Tulsa")
            .state("OK")
            .build();

        assert!(req.validate().is_ok());
    }

    #[test]
    fn service_hub_requires_hub_key() {
        let req = PageRequest::builder().mode(PageMode::ServiceHub).build();
        let err = req.validate().unwrap_err();
        assert!(err.contains("hub_key"));
    }
}
