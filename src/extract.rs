use scraper::{ElementRef, Html, Selector};
use url::Url;

pub const BASE_URL: &str = "https://www.yellowpages.com";

/// Raw per-listing fields as they appear on a results page, before any
/// normalization. Missing selector matches are absent fields, not errors.
#[derive(Debug, Clone, Default)]
pub struct RawListing {
    pub is_ad: bool,
    pub url: Option<String>,
    pub name: Option<String>,
    pub address: Option<String>,
    /// Raw href of the email link, still "mailto:"-prefixed.
    pub email_attr: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    /// Class attribute of the rating element, e.g. "result-rating three half".
    pub rating_class: Option<String>,
    pub rating_count_text: Option<String>,
    pub snippet: Option<String>,
    pub image: Option<String>,
    pub categories: Vec<String>,
}

pub struct ExtractedPage {
    pub listings: Vec<RawListing>,
    pub next_page_url: Option<String>,
}

/// Extract every result element from one results page, plus the pagination
/// next link if present. A page with zero result elements yields an empty
/// listing sequence.
pub fn extract_results(html: &str, page_url: &str) -> ExtractedPage {
    let result_sel = Selector::parse(".search-results .result").unwrap();
    let name_sel = Selector::parse(".info .n a").unwrap();
    let slug_sel = Selector::parse("a.business-name").unwrap();
    let adr_sel = Selector::parse(".adr").unwrap();
    let details_p_sel = Selector::parse("#details-card p").unwrap();
    let email_sel = Selector::parse(".email-business").unwrap();
    let phone_sel = Selector::parse(".info .phone").unwrap();
    let website_sel = Selector::parse("a.track-visit-website").unwrap();
    let rating_sel = Selector::parse(".result-rating").unwrap();
    let count_sel = Selector::parse(".result-rating .count").unwrap();
    let snippet_sel = Selector::parse(".snippet").unwrap();
    let image_sel = Selector::parse("a.photo img").unwrap();
    let categories_sel = Selector::parse(".categories a").unwrap();
    let ad_pill_sel = Selector::parse(".ad-pill").unwrap();
    let next_sel = Selector::parse(".pagination .next").unwrap();

    let base = Url::parse(page_url).unwrap_or_else(|_| Url::parse(BASE_URL).unwrap());
    let document = Html::parse_document(html);

    let listings = document
        .select(&result_sel)
        .map(|result| {
            let address = get_text(result, &adr_sel)
                .or_else(|| labeled_address(result, &details_p_sel));

            RawListing {
                is_ad: get_text(result, &ad_pill_sel).as_deref() == Some("Ad"),
                url: get_attr(result, &slug_sel, "href")
                    .and_then(|href| absolutize(&base, &href)),
                name: get_text(result, &name_sel),
                address,
                email_attr: get_attr(result, &email_sel, "href"),
                phone: get_text(result, &phone_sel),
                website: get_attr(result, &website_sel, "href"),
                rating_class: get_attr(result, &rating_sel, "class"),
                rating_count_text: get_text(result, &count_sel),
                snippet: get_text(result, &snippet_sel),
                image: get_attr(result, &image_sel, "src"),
                categories: result
                    .select(&categories_sel)
                    .map(element_text)
                    .filter(|c| !c.is_empty())
                    .collect(),
            }
        })
        .collect();

    let next_page_url = document
        .select(&next_sel)
        .next()
        .and_then(|a| a.attr("href"))
        .and_then(|href| absolutize(&base, href));

    ExtractedPage {
        listings,
        next_page_url,
    }
}

/// Email href from a business detail page, for the two-fetch enrichment
/// mode. Falls back to the first mailto anchor anywhere on the page.
pub fn extract_detail_email(html: &str) -> Option<String> {
    let email_sel = Selector::parse(".email-business").unwrap();
    let mailto_sel = Selector::parse("a[href^=\"mailto:\"]").unwrap();

    let document = Html::parse_document(html);
    document
        .select(&email_sel)
        .next()
        .and_then(|a| a.attr("href"))
        .or_else(|| {
            document
                .select(&mailto_sel)
                .next()
                .and_then(|a| a.attr("href"))
        })
        .map(str::to_string)
}

fn element_text(el: ElementRef) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// Trimmed text of the first descendant matching `sel`, empty → absent.
fn get_text(el: ElementRef, sel: &Selector) -> Option<String> {
    let text = element_text(el.select(sel).next()?);
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn get_attr(el: ElementRef, sel: &Selector, attr: &str) -> Option<String> {
    el.select(sel).next()?.attr(attr).map(str::to_string)
}

/// Fallback address heuristic: find the labeled "Address:" paragraph in the
/// details card and strip the label.
fn labeled_address(el: ElementRef, details_p_sel: &Selector) -> Option<String> {
    el.select(details_p_sel)
        .map(element_text)
        .find(|text| text.contains("Address:"))
        .map(|text| text.replace("Address:", "").trim().to_string())
        .filter(|text| !text.is_empty())
}

fn absolutize(base: &Url, href: &str) -> Option<String> {
    base.join(href).ok().map(|u| u.to_string())
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> String {
        std::fs::read_to_string("tests/fixtures/search_results.html").unwrap()
    }

    const PAGE_URL: &str =
        "https://www.yellowpages.com/search?search_terms=plumber&geo_location_terms=Springfield";

    #[test]
    fn extracts_all_result_elements_in_order() {
        let page = extract_results(&fixture(), PAGE_URL);
        assert_eq!(page.listings.len(), 3);
        assert_eq!(page.listings[0].name.as_deref(), Some("Berkeys Plumbing"));
        assert_eq!(page.listings[1].name.as_deref(), Some("Springfield Drain Pros"));
        assert_eq!(page.listings[2].name.as_deref(), Some("Mom & Pop Pipes"));
    }

    #[test]
    fn full_listing_fields() {
        let page = extract_results(&fixture(), PAGE_URL);
        let first = &page.listings[0];
        assert!(!first.is_ad);
        assert_eq!(
            first.url.as_deref(),
            Some("https://www.yellowpages.com/southlake-tx/mip/berkeys-plumbing-101")
        );
        assert_eq!(
            first.address.as_deref(),
            Some("1070 S Kimball Ave Suite 131, Southlake, TX 76092")
        );
        assert_eq!(
            first.email_attr.as_deref(),
            Some("mailto:info@berkeys.com?subject=Found you on YP")
        );
        assert_eq!(first.phone.as_deref(), Some("(972) 460-6860"));
        assert_eq!(first.website.as_deref(), Some("http://www.berkeys.com"));
        assert_eq!(
            first.rating_class.as_deref(),
            Some("result-rating three half")
        );
        assert_eq!(first.rating_count_text.as_deref(), Some("(12)"));
        assert_eq!(
            first.snippet.as_deref(),
            Some("They came the same day and fixed it fast.")
        );
        assert_eq!(
            first.image.as_deref(),
            Some("https://i2.ypcdn.com/blob/abc123_228x119.jpg")
        );
        assert_eq!(first.categories, vec!["Plumbers", "Water Heaters"]);
    }

    #[test]
    fn ad_pill_marks_listing_as_ad() {
        let page = extract_results(&fixture(), PAGE_URL);
        assert!(page.listings[1].is_ad);
        assert!(!page.listings[2].is_ad);
    }

    #[test]
    fn address_falls_back_to_labeled_paragraph() {
        let page = extract_results(&fixture(), PAGE_URL);
        // Third listing has no .adr element, only the details card.
        assert_eq!(
            page.listings[2].address.as_deref(),
            Some("12 Main St, Springfield, IL 62701")
        );
    }

    #[test]
    fn missing_selectors_are_absent_fields() {
        let page = extract_results(&fixture(), PAGE_URL);
        let minimal = &page.listings[2];
        assert_eq!(minimal.email_attr, None);
        assert_eq!(minimal.website, None);
        assert_eq!(minimal.rating_class, None);
        assert_eq!(minimal.image, None);
        assert!(minimal.categories.is_empty());
    }

    #[test]
    fn next_page_link_resolved_absolute() {
        let page = extract_results(&fixture(), PAGE_URL);
        assert_eq!(
            page.next_page_url.as_deref(),
            Some("https://www.yellowpages.com/search?search_terms=plumber&geo_location_terms=Springfield&page=2")
        );
    }

    #[test]
    fn empty_page_yields_empty_sequence() {
        let page = extract_results("<html><body><p>No results</p></body></html>", PAGE_URL);
        assert!(page.listings.is_empty());
        assert_eq!(page.next_page_url, None);
    }

    #[test]
    fn detail_email_prefers_email_business_link() {
        let html = r#"<html><body>
            <a class="email-business" href="mailto:sales@acme.com">Email</a>
            <a href="mailto:other@acme.com">other</a>
        </body></html>"#;
        assert_eq!(
            extract_detail_email(html).as_deref(),
            Some("mailto:sales@acme.com")
        );
    }

    #[test]
    fn detail_email_falls_back_to_any_mailto() {
        let html = r#"<html><body><a href="mailto:other@acme.com">contact</a></body></html>"#;
        assert_eq!(
            extract_detail_email(html).as_deref(),
            Some("mailto:other@acme.com")
        );
        assert_eq!(extract_detail_email("<html><body></body></html>"), None);
    }
}
