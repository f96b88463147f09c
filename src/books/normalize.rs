use time::{macros::format_description, Date};

use super::{catalog::Volume, NewBook};

pub const UNKNOWN_TITLE: &str = "Unknown Title";
pub const UNKNOWN_AUTHOR: &str = "Unknown Author";
pub const NO_DESCRIPTION: &str = "No description available";
pub const DEFAULT_LANGUAGE: &str = "en";

/// Maps a catalog volume onto the local book row.
pub fn normalize(volume: Volume) -> NewBook {
    let info = volume.volume_info;

    let authors: Vec<String> = info
        .authors
        .unwrap_or_default()
        .into_iter()
        .map(|author| author.trim().to_owned())
        .filter(|author| !author.is_empty())
        .collect();

    let isbn = info.industry_identifiers.and_then(|ids| {
        ["ISBN_13", "ISBN_10"].into_iter().find_map(|kind| {
            ids.iter()
                .find(|id| id.kind == kind)
                .map(|id| id.identifier.clone())
        })
    });

    NewBook {
        id: volume.id,
        title: non_blank(info.title).unwrap_or_else(|| UNKNOWN_TITLE.to_owned()),
        author: if authors.is_empty() {
            UNKNOWN_AUTHOR.to_owned()
        } else {
            authors.join(", ")
        },
        description: non_blank(info.description).unwrap_or_else(|| NO_DESCRIPTION.to_owned()),
        cover_image_url: info
            .image_links
            .and_then(|links| links.thumbnail.or(links.small_thumbnail)),
        genres: info.categories,
        isbn,
        published_date: info.published_date.filter(|date| is_calendar_date(date)),
        page_count: info
            .page_count
            .and_then(|count| count.as_f64())
            .filter(|count| count.is_finite())
            .map(|count| count as i64),
        language: non_blank(info.language).unwrap_or_else(|| DEFAULT_LANGUAGE.to_owned()),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Strict `YYYY-MM-DD` that also names a real day.
pub fn is_calendar_date(text: &str) -> bool {
    let shape_ok = text.len() == 10
        && text.bytes().enumerate().all(|(i, b)| match i {
            4 | 7 => b == b'-',
            _ => b.is_ascii_digit(),
        });

    shape_ok && Date::parse(text, format_description!("[year]-[month]-[day]")).is_ok()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::books::catalog::{ImageLinks, IndustryIdentifier, VolumeInfo};

    fn volume(info: VolumeInfo) -> Volume {
        Volume { id: "vol-1".into(), volume_info: info }
    }

    #[test]
    fn fills_defaults_for_a_bare_volume() {
        let book = normalize(volume(VolumeInfo::default()));
        assert_eq!(book.id, "vol-1");
        assert_eq!(book.title, UNKNOWN_TITLE);
        assert_eq!(book.author, UNKNOWN_AUTHOR);
        assert_eq!(book.description, NO_DESCRIPTION);
        assert_eq!(book.cover_image_url, None);
        assert_eq!(book.genres, None);
        assert_eq!(book.isbn, None);
        assert_eq!(book.published_date, None);
        assert_eq!(book.page_count, None);
        assert_eq!(book.language, "en");
    }

    #[test]
    fn joins_authors() {
        let book = normalize(volume(VolumeInfo {
            authors: Some(vec!["Terry Pratchett".into(), " ".into(), "Neil Gaiman".into()]),
            ..Default::default()
        }));
        assert_eq!(book.author, "Terry Pratchett, Neil Gaiman");

        let book = normalize(volume(VolumeInfo { authors: Some(vec![]), ..Default::default() }));
        assert_eq!(book.author, UNKNOWN_AUTHOR);
    }

    #[test]
    fn partial_dates_become_null() {
        for (raw, expected) in [
            ("1999", None),
            ("1999-05", None),
            ("1999-05-14", Some("1999-05-14")),
            ("1999-02-30", None),
            ("99-05-14xx", None),
        ] {
            let info = VolumeInfo { published_date: Some(raw.into()), ..Default::default() };
            let book = normalize(volume(info));
            assert_eq!(book.published_date.as_deref(), expected, "{raw}");
        }
    }

    #[test]
    fn prefers_isbn_13() {
        let ids = vec![
            IndustryIdentifier { kind: "ISBN_10".into(), identifier: "0441172717".into() },
            IndustryIdentifier { kind: "OTHER".into(), identifier: "UOM:39015".into() },
            IndustryIdentifier { kind: "ISBN_13".into(), identifier: "9780441172719".into() },
        ];
        let info = VolumeInfo { industry_identifiers: Some(ids), ..Default::default() };
        let book = normalize(volume(info));
        assert_eq!(book.isbn.as_deref(), Some("9780441172719"));

        let ids = vec![IndustryIdentifier { kind: "OTHER".into(), identifier: "x".into() }];
        let info = VolumeInfo { industry_identifiers: Some(ids), ..Default::default() };
        let book = normalize(volume(info));
        assert_eq!(book.isbn, None);
    }

    #[test]
    fn keeps_only_numeric_page_counts() {
        let count = |value: serde_json::Value| {
            let info = VolumeInfo { page_count: Some(value), ..Default::default() };
            normalize(volume(info)).page_count
        };
        assert_eq!(count(json!(412)), Some(412));
        assert_eq!(count(json!("412")), None);
        assert_eq!(count(json!(null)), None);
    }

    #[test]
    fn passes_genres_and_cover_through() {
        let book = normalize(volume(VolumeInfo {
            categories: Some(vec!["Fiction".into()]),
            image_links: Some(ImageLinks {
                thumbnail: Some("http://img/t".into()),
                small_thumbnail: None,
            }),
            language: Some("fr".into()),
            ..Default::default()
        }));
        assert_eq!(book.genres, Some(vec!["Fiction".to_owned()]));
        assert_eq!(book.cover_image_url.as_deref(), Some("http://img/t"));
        assert_eq!(book.language, "fr");
    }
}
