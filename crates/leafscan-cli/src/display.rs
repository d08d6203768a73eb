//! Terminal rendering for diagnoses and label maps.

use std::fmt::Write;

use leafscan_core::{Diagnosis, LabelMap, Prediction};

// ── Public API ──

/// Render a diagnosis as a small card headed by the image name.
pub fn diagnosis_card(image_name: &str, diagnosis: &Diagnosis, augmented: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== {image_name} ===");
    if augmented {
        let _ = writeln!(out, "(augmented input)");
    }
    let _ = writeln!(out);
    push_prediction(&mut out, "Crop", &diagnosis.crop);
    push_prediction(&mut out, "Disease", &diagnosis.disease);
    out
}

/// Render a label map as an index/name table.
pub fn label_table(labels: &LabelMap) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} ({} classes)", labels.space(), labels.len());
    for (index, name) in labels.iter() {
        let _ = writeln!(out, "  {index:>3}  {name}");
    }
    out
}

// ── Helpers ──

fn push_prediction(out: &mut String, header: &str, prediction: &Prediction) {
    let _ = writeln!(out, "{header}");
    let _ = writeln!(out, "  {:<26} {}", "class", prediction.index);
    let _ = writeln!(out, "  {:<26} {}", "name", prediction.name);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn card_lists_both_label_spaces() {
        let diagnosis = Diagnosis {
            crop: Prediction::new(13, "Tomato Leaf"),
            disease: Prediction::new(16, "Septoria leaf spot"),
        };
        let card = diagnosis_card("leaf.jpg", &diagnosis, false);
        assert!(card.starts_with("=== leaf.jpg ===\n"));
        assert!(card.contains("Crop\n  class                      13\n"));
        assert!(card.contains("  name                       Septoria leaf spot\n"));
        assert!(!card.contains("augmented"));
    }

    #[test]
    fn card_marks_augmented_runs() {
        let diagnosis = Diagnosis {
            crop: Prediction::new(0, "Apple Leaf"),
            disease: Prediction::new(0, "Healthy Leaf"),
        };
        assert!(diagnosis_card("x.png", &diagnosis, true).contains("(augmented input)"));
    }

    #[test]
    fn label_table_has_one_row_per_class() {
        let table = label_table(&LabelMap::crop());
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], "crop (14 classes)");
        assert_eq!(lines.len(), 15);
        assert_eq!(lines[1], "    0  Apple Leaf");
        assert_eq!(lines[14], "   13  Tomato Leaf");
    }
}
