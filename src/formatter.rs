//! Renders final [`TaxonResult`]s into the two JSON output shapes: deduplicated
//! (one entry per unique mention) and full (one entry per occurrence).

use serde_json::{json, Value};

use crate::models::TaxonResult;

pub fn format_deduplicated(results: &[TaxonResult]) -> Value {
    let items: Vec<Value> = results
        .iter()
        .map(|result| {
            let mut value = serde_json::to_value(result).expect("TaxonResult always serializes");
            value["count"] = json!(result.count());
            value
        })
        .collect();
    json!({ "version": "1.0", "results": items })
}

pub fn format_full(results: &[TaxonResult]) -> Value {
    let mut items = Vec::new();
    for result in results {
        let base = json!({
            "identified": result.identified,
            "extraction_confidence": result.extraction_confidence,
            "extraction_method": result.extraction_method,
            "matches": result.matches,
            "candidate_names": result.candidate_names,
            "reason": result.reason,
            "llm_response": result.llm_response,
        });
        for occ in &result.occurrences {
            let mut entry = base.clone();
            entry["line_number"] = json!(occ.line_number);
            entry["source_text"] = json!(occ.source_text);
            entry["source_context"] = json!(occ.source_context);
            items.push(entry);
        }
    }
    json!({ "version": "1.0", "results": items })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExtractionMethod, Occurrence};

    fn sample_result() -> TaxonResult {
        TaxonResult {
            source_text: "липа".into(),
            identified: true,
            extraction_confidence: 1.0,
            extraction_method: ExtractionMethod::Gazetteer,
            occurrences: vec![
                Occurrence { line_number: 1, source_text: "липа".into(), source_context: "видел липу".into() },
                Occurrence { line_number: 5, source_text: "липы".into(), source_context: "две липы".into() },
            ],
            matches: vec![],
            llm_response: None,
            candidate_names: vec![],
            reason: String::new(),
        }
    }

    #[test]
    fn deduplicated_adds_count_field() {
        let value = format_deduplicated(&[sample_result()]);
        assert_eq!(value["results"][0]["count"], 2);
        assert_eq!(value["version"], "1.0");
    }

    #[test]
    fn full_expands_one_entry_per_occurrence() {
        let value = format_full(&[sample_result()]);
        let items = value["results"].as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["line_number"], 1);
        assert_eq!(items[1]["line_number"], 5);
        assert_eq!(items[0]["identified"], true);
    }
}
