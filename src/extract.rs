use thiserror::Error;

use crate::db::{AdId, AdRecord};
use crate::page::AdFragment;
use crate::utils::{clean_text, slice_price, strip_distance_suffix};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("missing {0}")]
    Missing(&'static str),

    #[error("non-numeric ad id {0:?}")]
    BadId(String),
}

/// Identifier of a fragment, converted to the canonical type.
pub fn ad_id(fragment: &AdFragment) -> Result<AdId, ExtractError> {
    let raw = fragment.ad_id.as_deref().ok_or(ExtractError::Missing("ad id"))?;
    raw.parse().map_err(|_| ExtractError::BadId(raw.to_string()))
}

/// Build a normalized record from one fragment.
///
/// Title, description, location and date go through [`clean_text`]; the price keeps
/// its `$` and separators.
pub fn extract(fragment: &AdFragment, site_base: &str) -> Result<AdRecord, ExtractError> {
    let id = ad_id(fragment)?;
    let title = required(&fragment.title, "title")?;
    let vip_url = required(&fragment.vip_url, "detail url")?;
    let description = required(&fragment.description, "description")?;
    let location = required(&fragment.location, "location")?;
    let posted = required(&fragment.posted, "posted date")?;
    let price = required(&fragment.price, "price")?;

    Ok(AdRecord {
        id,
        title: clean_field(title),
        description: clean_field(description),
        location: clean_field(strip_distance_suffix(location)),
        posted: clean_field(posted),
        price: slice_price(price).to_string(),
        url: format!("{}{}", site_base.trim_end_matches('/'), vip_url),
    })
}

fn required<'a>(field: &'a Option<String>, name: &'static str) -> Result<&'a str, ExtractError> {
    field.as_deref().ok_or(ExtractError::Missing(name))
}

fn clean_field(raw: &str) -> String {
    clean_text(raw.trim()).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::parse_fragments;

    const BASE: &str = "http://www.kijiji.ca";

    fn fragments() -> Vec<AdFragment> {
        let html = std::fs::read_to_string("tests/fixtures/results_page.html").unwrap();
        parse_fragments(&html)
    }

    #[test]
    fn well_formed_fragment() {
        let r = extract(&fragments()[0], BASE).unwrap();
        assert_eq!(r.id, AdId(1400000101));
        assert_eq!(r.title, "2012 Honda Civic LX  low km");
        assert_eq!(r.price, "$6,500");
        assert_eq!(r.location, "Ottawa");
        assert_eq!(r.posted, "2 hours ago");
        assert_eq!(r.description, "Well maintained winter package new brakes");
        assert_eq!(
            r.url,
            "http://www.kijiji.ca/v-cars-trucks/ottawa/2012-honda-civic/1400000101"
        );
    }

    #[test]
    fn missing_title_fails_but_siblings_extract() {
        let results: Vec<_> = fragments().iter().map(|f| extract(f, BASE)).collect();
        assert_eq!(results.len(), 4);
        assert_eq!(results[3], Err(ExtractError::Missing("title")));
        assert!(results[..3].iter().all(|r| r.is_ok()));
    }

    #[test]
    fn bad_and_missing_ids() {
        let mut f = fragments()[1].clone();
        f.ad_id = Some("abc".into());
        assert_eq!(extract(&f, BASE), Err(ExtractError::BadId("abc".into())));

        f.ad_id = None;
        assert_eq!(extract(&f, BASE), Err(ExtractError::Missing("ad id")));
    }

    #[test]
    fn missing_detail_url_fails() {
        let mut f = fragments()[1].clone();
        f.vip_url = None;
        assert_eq!(extract(&f, BASE), Err(ExtractError::Missing("detail url")));
    }

    #[test]
    fn price_without_dollar_is_empty() {
        let mut f = fragments()[1].clone();
        f.price = Some("Please Contact".into());
        assert_eq!(extract(&f, BASE).unwrap().price, "");
    }

    #[test]
    fn trailing_slash_on_base_not_doubled() {
        let r = extract(&fragments()[1], "http://www.kijiji.ca/").unwrap();
        assert!(r.url.starts_with("http://www.kijiji.ca/v-cars-trucks/"));
    }
}
