use crate::models::{RankedEntry, ResolvedPlace, TaxonomyEntry};
use crate::orchestrator::{QueryBody, QueryOutcome};
use crate::ranking::GroupBy;

/// Formats a query outcome into a human-readable string
pub fn format_outcome(outcome: &QueryOutcome) -> String {
    let mut output = format!(
        "{}{}:\n",
        capitalize(outcome.kind.name()),
        location_suffix(outcome)
    );
    if let Some(place) = &outcome.place {
        output.push_str(&format_place_note(place));
    }
    output.push('\n');

    match &outcome.body {
        QueryBody::Ranked { group_by, entries } => {
            output.push_str(&format_ranked(entries, *group_by))
        }
        QueryBody::Taxonomy(entries) => output.push_str(&format_taxonomy(entries)),
        QueryBody::Forms(codes) => output.push_str(&format_forms(codes)),
    }

    let completeness = &outcome.completeness;
    if completeness.omitted_branches > 0 {
        output.push_str(&format!(
            "\nNote: {} of {} hotspot lookups failed; results may be incomplete.\n",
            completeness.omitted_branches, completeness.branches
        ));
    }
    if completeness.dropped_records > 0 {
        output.push_str(&format!(
            "\nNote: {} malformed record(s) from the provider were skipped.\n",
            completeness.dropped_records
        ));
    }
    output
}

/// Formats a ranked top-N list, one numbered line per entry
pub fn format_ranked(entries: &[RankedEntry], group_by: GroupBy) -> String {
    if entries.is_empty() {
        return match group_by {
            GroupBy::Species => "No observations found.\n".to_string(),
            GroupBy::Location => "No hotspots found.\n".to_string(),
        };
    }

    let mut output = String::new();
    for entry in entries {
        output.push_str(&format!(
            "{}. {} - {} ({})\n",
            entry.rank, entry.label, entry.score, entry.supporting_location
        ));
    }
    output
}

/// Formats taxonomy entries into a human-readable string
pub fn format_taxonomy(entries: &[TaxonomyEntry]) -> String {
    if entries.is_empty() {
        return "No taxonomy entries found.\n".to_string();
    }

    let mut output = String::new();
    for entry in entries {
        output.push_str(&format!("{} [{}]", entry.common_name, entry.species_code));
        if let Some(scientific) = &entry.scientific_name {
            output.push_str(&format!(" - {}", scientific));
        }
        if let Some(family) = &entry.family {
            output.push_str(&format!(" ({})", family));
        }
        output.push('\n');
    }
    output
}

fn format_forms(codes: &[String]) -> String {
    if codes.is_empty() {
        return "No taxonomic forms found.\n".to_string();
    }
    format!("{}\n", codes.join(", "))
}

/// Formats a resolved place, disclosing the capital-city approximation
pub fn format_place(place: &ResolvedPlace) -> String {
    format!(
        "{} resolved to {} ({:.4}, {:.4})\n{}",
        place.input_text,
        place.matched_name,
        place.coordinate.latitude(),
        place.coordinate.longitude(),
        format_place_note(place)
    )
}

fn format_place_note(place: &ResolvedPlace) -> String {
    if place.is_capital_fallback {
        format!(
            "Note: '{}' is a country or region; using its capital, {}.\n",
            place.input_text, place.matched_name
        )
    } else {
        String::new()
    }
}

fn location_suffix(outcome: &QueryOutcome) -> String {
    match (&outcome.place, &outcome.region_code, &outcome.point) {
        (Some(place), _, Some(point)) => format!(
            " near {} ({:.4}, {:.4})",
            place.input_text,
            point.latitude(),
            point.longitude()
        ),
        (_, Some(region), _) => format!(" in {}", region),
        (_, _, Some(point)) => format!(" near {:.4}, {:.4}", point.latitude(), point.longitude()),
        _ => String::new(),
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Coordinate, IntentKind};
    use crate::orchestrator::{Completeness, QueryKind};

    fn entry(rank: usize, label: &str, score: u64, support: &str) -> RankedEntry {
        RankedEntry {
            rank,
            label: label.to_string(),
            supporting_location: support.to_string(),
            score,
        }
    }

    fn outcome(body: QueryBody) -> QueryOutcome {
        QueryOutcome {
            kind: QueryKind::Intent(IntentKind::RecentObservations),
            place: None,
            region_code: Some("US-MA".to_string()),
            point: None,
            body,
            completeness: Completeness::default(),
            stages: vec![],
        }
    }

    #[test]
    fn renders_ranked_species() {
        let text = format_outcome(&outcome(QueryBody::Ranked {
            group_by: GroupBy::Species,
            entries: vec![
                entry(1, "Canada Goose", 120, "Fresh Pond"),
                entry(2, "Mallard", 40, "Jamaica Pond"),
            ],
        }));
        assert_eq!(
            text,
            "Recent observations in US-MA:\n\n\
             1. Canada Goose - 120 (Fresh Pond)\n\
             2. Mallard - 40 (Jamaica Pond)\n"
        );
    }

    #[test]
    fn empty_hotspot_list_is_not_an_error() {
        assert_eq!(format_ranked(&[], GroupBy::Location), "No hotspots found.\n");
    }

    #[test]
    fn discloses_capital_fallback_and_partial_results() {
        let mut o = outcome(QueryBody::Ranked {
            group_by: GroupBy::Species,
            entries: vec![entry(1, "Bald Eagle", 3, "Mendenhall Wetlands")],
        });
        let coordinate = Coordinate::new(58.3019, -134.4197).unwrap();
        o.region_code = None;
        o.point = Some(coordinate);
        o.place = Some(ResolvedPlace {
            input_text: "Alaska".to_string(),
            coordinate,
            matched_name: "Juneau, Alaska".to_string(),
            is_capital_fallback: true,
        });
        o.completeness = Completeness {
            branches: 3,
            omitted_branches: 1,
            dropped_records: 0,
        };

        let text = format_outcome(&o);
        assert!(text.starts_with("Recent observations near Alaska (58.3019, -134.4197):\n"));
        assert!(text.contains("using its capital, Juneau, Alaska"));
        assert!(text.contains("1 of 3 hotspot lookups failed"));
    }

    #[test]
    fn renders_taxonomy_lines() {
        let text = format_taxonomy(&[TaxonomyEntry {
            species_code: "baleag".to_string(),
            common_name: "Bald Eagle".to_string(),
            scientific_name: Some("Haliaeetus leucocephalus".to_string()),
            category: Some("species".to_string()),
            family: Some("Hawks, Eagles, and Kites".to_string()),
        }]);
        assert_eq!(
            text,
            "Bald Eagle [baleag] - Haliaeetus leucocephalus (Hawks, Eagles, and Kites)\n"
        );
    }
}
