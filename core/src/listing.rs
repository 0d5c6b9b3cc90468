//! Real-estate listings: the near-duplicate rule and grid feature vectors.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub id: String,
    /// Offer type, e.g. `kaufen` or `mieten`.
    pub action: String,
    #[serde(default)]
    pub square_meter: Option<f64>,
    #[serde(default)]
    pub rooms: Option<f64>,
    /// Free-form date string; only the leading year is compared.
    #[serde(default)]
    pub year_of_construction: Option<String>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
}

fn year_prefix(year: &str) -> &str {
    match year.char_indices().nth(4) {
        Some((i, _)) => &year[..i],
        None => year,
    }
}

/// Whether `candidate` looks like a re-post of `node`.
///
/// Size, rooms and action must match exactly. The construction year is only
/// checked when `node` has one, so the relation is not symmetric.
#[allow(clippy::float_cmp)]
pub fn is_similar(node: &Listing, candidate: &Listing) -> bool {
    let base = candidate.square_meter == node.square_meter
        && candidate.rooms == node.rooms
        && candidate.action == node.action;
    match &node.year_of_construction {
        None => base,
        Some(year) => {
            base && candidate
                .year_of_construction
                .as_deref()
                .is_some_and(|other| year_prefix(other) == year_prefix(year))
        }
    }
}

/// Candidates other than `node` itself that pass [`is_similar`], in input order.
pub fn similar_listings<'a>(node: &Listing, candidates: &'a [Listing]) -> Vec<&'a Listing> {
    candidates
        .iter()
        .filter(|c| c.id != node.id && is_similar(node, c))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureSet {
    /// `[lat, lon]`
    Location,
    /// `[lat, lon, square_meter, rooms]`
    LocationSize,
    /// `[lat, lon, square_meter, rooms, age]`
    LocationSizeAge,
}

const MIN_AGE: i32 = -20;
const MAX_AGE: i32 = 2000;

fn current_year() -> i32 { time::OffsetDateTime::now_utc().year() }

/// Age in years from the leading four digits, dropped when implausible.
pub fn age(listing: &Listing, now_year: i32) -> Option<i32> {
    let year = listing.year_of_construction.as_deref()?;
    let built: i32 = year_prefix(year).parse().ok()?;
    let age = now_year - built;
    (MIN_AGE..MAX_AGE).contains(&age).then_some(age)
}

impl FeatureSet {
    /// The richest feature set the listing can fill, `None` without a location.
    pub fn select(listing: &Listing) -> Option<FeatureSet> {
        Self::select_at(listing, current_year())
    }

    fn select_at(listing: &Listing, now_year: i32) -> Option<FeatureSet> {
        listing.lat?;
        listing.lon?;
        let sized = listing.square_meter.is_some_and(|s| s > 0.0) && listing.rooms.is_some();
        if !sized {
            return Some(FeatureSet::Location);
        }
        if age(listing, now_year).is_some() {
            Some(FeatureSet::LocationSizeAge)
        } else {
            Some(FeatureSet::LocationSize)
        }
    }

    /// Number of columns `features` yields.
    pub fn dim(self) -> usize {
        match self {
            FeatureSet::Location => 2,
            FeatureSet::LocationSize => 4,
            FeatureSet::LocationSizeAge => 5,
        }
    }

    /// Feature vector for this set; `None` if the listing lacks a required field.
    pub fn features(self, listing: &Listing) -> Option<Vec<f32>> {
        self.features_at(listing, current_year())
    }

    fn features_at(self, listing: &Listing, now_year: i32) -> Option<Vec<f32>> {
        let mut out = vec![listing.lat? as f32, listing.lon? as f32];
        if self == FeatureSet::Location {
            return Some(out);
        }
        out.push(listing.square_meter.filter(|s| *s > 0.0)? as f32);
        out.push(listing.rooms? as f32);
        if self == FeatureSet::LocationSizeAge {
            out.push(age(listing, now_year)? as f32);
        }
        Some(out)
    }
}
