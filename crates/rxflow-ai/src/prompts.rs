//! Prompts for clinical decision-support analysis.

use serde::{Deserialize, Serialize};

/// Marker opening the case block inside a prompt.
pub const CASE_START: &str = "### Case";
/// Marker closing the case block inside a prompt.
pub const CASE_END: &str = "### End case";

/// System prompt for pharmacist-facing clinical analysis.
pub const SYSTEM_PROMPT: &str = r#"You are a clinical decision-support assistant working with community pharmacists.

Analyse the patient case and respond with a single JSON object containing:
- diagnoses: differential diagnoses with condition, probability (0-1), reasoning, severity (low|medium|high|critical), icdCode (optional) and confidence (0-1)
- suggestedTests: investigations with testName, priority (urgent|routine|optional) and reasoning
- medicationSuggestions: drugName, dosage, frequency, duration, reasoning and safetyNotes
- redFlags: findings that need urgent action, each with flag, severity and action
- referral: recommended, urgency (immediate|within_24h|within_week|routine), specialty, reason
- riskAssessment: overallRisk (low|medium|high|critical), riskFactors, mitigatingFactors

Account for current medications and allergies. Never suggest a drug the patient is allergic to.
Your output is reviewed by a pharmacist before it reaches the patient."#;

/// Aggregated, prompt-ready view of a patient case.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CaseSummary {
    pub age_years: Option<u32>,
    pub gender: Option<String>,
    pub symptoms: Vec<String>,
    pub objective_findings: Vec<String>,
    pub duration: String,
    pub severity: String,
    pub onset: String,
    /// (label, value) pairs, already formatted with units
    pub vitals: Vec<(String, String)>,
    pub medications: Vec<String>,
    pub allergies: Vec<String>,
    pub medical_history: Vec<String>,
    pub social_history: Vec<String>,
}

fn list_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "none reported".to_string()
    } else {
        items.join("; ")
    }
}

/// Render the case block for a single analysis request.
pub fn render_case(case: &CaseSummary) -> String {
    let mut out = String::new();
    out.push_str(CASE_START);
    out.push('\n');

    let age = case
        .age_years
        .map(|a| format!("{} years", a))
        .unwrap_or_else(|| "unknown".into());
    let gender = case.gender.as_deref().unwrap_or("unknown");
    out.push_str(&format!("Patient: age {}, gender {}\n", age, gender));
    out.push_str(&format!("Presenting symptoms: {}\n", list_or_none(&case.symptoms)));
    out.push_str(&format!(
        "Objective findings: {}\n",
        list_or_none(&case.objective_findings)
    ));
    out.push_str(&format!(
        "Duration: {}; severity: {}; onset: {}\n",
        case.duration, case.severity, case.onset
    ));

    if case.vitals.is_empty() {
        out.push_str("Vitals: not recorded\n");
    } else {
        let vitals: Vec<String> = case
            .vitals
            .iter()
            .map(|(label, value)| format!("{} {}", label, value))
            .collect();
        out.push_str(&format!("Vitals: {}\n", vitals.join(", ")));
    }

    out.push_str(&format!("Current medications: {}\n", list_or_none(&case.medications)));
    out.push_str(&format!("Allergies: {}\n", list_or_none(&case.allergies)));
    out.push_str(&format!("Medical history: {}\n", list_or_none(&case.medical_history)));
    out.push_str(&format!("Social history: {}\n", list_or_none(&case.social_history)));
    out.push_str(CASE_END);
    out
}

/// User prompt for one analysis.
pub fn make_diagnostic_prompt(case: &CaseSummary) -> String {
    format!(
        "Assess the following case and return only the JSON object described above.\n\n{}",
        render_case(case)
    )
}

/// Example exchange used for few-shot prompting.
pub const FEW_SHOT_EXAMPLE: (&str, &str) = (
    "Patient: age 34 years, gender female\nPresenting symptoms: sore throat; mild fever\nDuration: 2 days; severity: mild; onset: acute",
    r#"{"diagnoses":[{"condition":"Viral pharyngitis","probability":0.75,"reasoning":"Acute sore throat with low-grade fever and no exudate reported","severity":"low","confidence":0.7}],"suggestedTests":[],"medicationSuggestions":[{"drugName":"Paracetamol","dosage":"500mg","frequency":"every 6 hours as needed","duration":"3 days","reasoning":"Symptomatic relief","safetyNotes":["Max 4g per day"]}],"redFlags":[],"referral":null,"riskAssessment":{"overallRisk":"low","riskFactors":[],"mitigatingFactors":["Young, otherwise healthy"]}}"#,
);

/// Build a complete prompt with system context and optional few-shot example.
pub fn build_full_prompt(case: &CaseSummary, include_examples: bool) -> String {
    let mut prompt = String::new();

    prompt.push_str("<|system|>\n");
    prompt.push_str(SYSTEM_PROMPT);
    prompt.push_str("\n<|end|>\n");

    if include_examples {
        let (input, output) = FEW_SHOT_EXAMPLE;
        prompt.push_str("<|user|>\nExample case:\n");
        prompt.push_str(input);
        prompt.push_str("\n<|end|>\n<|assistant|>\n");
        prompt.push_str(output);
        prompt.push_str("\n<|end|>\n");
    }

    prompt.push_str("<|user|>\n");
    prompt.push_str(&make_diagnostic_prompt(case));
    prompt.push_str("\n<|end|>\n");
    prompt.push_str("<|assistant|>\n");

    prompt
}

/// Extract the case block from a full prompt, if present.
pub fn case_block(prompt: &str) -> Option<&str> {
    let start = prompt.rfind(CASE_START)?;
    let end = prompt[start..].find(CASE_END)? + start;
    Some(&prompt[start + CASE_START.len()..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_case() -> CaseSummary {
        CaseSummary {
            age_years: Some(58),
            gender: Some("male".into()),
            symptoms: vec!["chest pain".into(), "sweating".into()],
            duration: "2 hours".into(),
            severity: "severe".into(),
            onset: "acute".into(),
            vitals: vec![("BP".into(), "150/95 mmHg".into())],
            allergies: vec!["penicillin".into()],
            ..Default::default()
        }
    }

    #[test]
    fn test_render_case_contains_details() {
        let rendered = render_case(&sample_case());
        assert!(rendered.starts_with(CASE_START));
        assert!(rendered.ends_with(CASE_END));
        assert!(rendered.contains("age 58 years"));
        assert!(rendered.contains("chest pain; sweating"));
        assert!(rendered.contains("BP 150/95 mmHg"));
        assert!(rendered.contains("Current medications: none reported"));
    }

    #[test]
    fn test_full_prompt_with_example() {
        let prompt = build_full_prompt(&sample_case(), true);
        assert!(prompt.contains("<|system|>"));
        assert!(prompt.contains("Viral pharyngitis"));
        assert!(prompt.ends_with("<|assistant|>\n"));
    }

    #[test]
    fn test_full_prompt_without_example() {
        let prompt = build_full_prompt(&sample_case(), false);
        assert!(!prompt.contains("Viral pharyngitis"));
        assert!(prompt.contains("chest pain"));
    }

    #[test]
    fn test_case_block_uses_last_case() {
        let prompt = build_full_prompt(&sample_case(), true);
        let block = case_block(&prompt).unwrap();
        assert!(block.contains("chest pain"));
        assert!(!block.contains("sore throat"));
    }
}
