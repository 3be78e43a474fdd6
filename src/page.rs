use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};

static AD_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("div.regular-ad").unwrap());
static TITLE_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a.title").unwrap());
static WATCH_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("div.watch").unwrap());
static DESC_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("div.description").unwrap());
static LOCATION_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.location").unwrap());
static DATE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("span.date-posted").unwrap());
static PRICE_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("div.price").unwrap());

/// Raw text of one listing, taken from fixed positions in the markup.
///
/// Owned so it can outlive the parsed document across await points. `None` means the
/// element was absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdFragment {
    pub ad_id: Option<String>,
    pub title: Option<String>,
    pub vip_url: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub posted: Option<String>,
    pub price: Option<String>,
}

/// Split a results page into ad fragments.
pub fn parse_fragments(html: &str) -> Vec<AdFragment> {
    let doc = Html::parse_document(html);
    doc.select(&AD_SEL).map(fragment_from).collect()
}

fn fragment_from(ad: ElementRef<'_>) -> AdFragment {
    AdFragment {
        ad_id: ad
            .select(&WATCH_SEL)
            .next()
            .and_then(|w| w.value().attr("data-adid"))
            .map(str::to_string),
        title: first_text(ad, &TITLE_SEL),
        vip_url: ad.value().attr("data-vip-url").map(str::to_string),
        description: first_text(ad, &DESC_SEL),
        location: first_text(ad, &LOCATION_SEL),
        posted: first_text(ad, &DATE_SEL),
        price: first_text(ad, &PRICE_SEL),
    }
}

fn first_text(ad: ElementRef<'_>, sel: &Selector) -> Option<String> {
    ad.select(sel)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("tests/fixtures/{}.html", name)).unwrap()
    }

    #[test]
    fn results_page_fragments() {
        let frags = parse_fragments(&fixture("results_page"));
        assert_eq!(frags.len(), 4);

        let first = &frags[0];
        assert_eq!(first.ad_id.as_deref(), Some("1400000101"));
        assert_eq!(first.title.as_deref(), Some("2012 Honda Civic LX – low km!"));
        assert_eq!(
            first.vip_url.as_deref(),
            Some("/v-cars-trucks/ottawa/2012-honda-civic/1400000101")
        );
        assert_eq!(first.location.as_deref(), Some("Ottawa\n            - 3km"));
        assert_eq!(first.posted.as_deref(), Some("< 2 hours ago"));
        assert_eq!(first.price.as_deref(), Some("$6,500.00"));
    }

    #[test]
    fn missing_elements_are_none() {
        let frags = parse_fragments(&fixture("results_page"));
        let broken = frags
            .iter()
            .find(|f| f.ad_id.as_deref() == Some("1400000199"))
            .unwrap();
        assert!(broken.title.is_none());
        assert!(broken.price.is_some());
    }

    #[test]
    fn non_ad_rows_ignored() {
        let frags = parse_fragments(&fixture("results_page"));
        // The top-ad banner carries a different class.
        assert!(frags.iter().all(|f| f.ad_id.as_deref() != Some("999")));
    }

    #[test]
    fn empty_page_has_no_fragments() {
        assert!(parse_fragments(&fixture("empty_page")).is_empty());
        assert!(parse_fragments("").is_empty());
    }
}
