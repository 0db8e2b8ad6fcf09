//! Patient clinical input and its encoding into the 13 Cleveland features.

use crate::error::RiskError;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Model feature order. Every artifact must be trained on exactly this layout.
pub const FEATURE_COLUMNS: [&str; 13] = [
    "age", "sex", "cp", "trestbps", "chol", "fbs", "restecg", "thalach", "exang", "oldpeak",
    "slope", "ca", "thal",
];

pub const FEATURE_COUNT: usize = FEATURE_COLUMNS.len();

/// Fasting blood sugar above this (mg/dl) sets `fbs`.
pub const FASTING_GLUCOSE_CUTOFF: u32 = 120;

pub fn feature_index(name: &str) -> Result<usize, RiskError> {
    FEATURE_COLUMNS
        .iter()
        .position(|c| *c == name)
        .ok_or_else(|| RiskError::UnknownFeature(name.to_string()))
}

pub fn describe_feature(name: &str) -> &'static str {
    match name {
        "age" => "Age",
        "sex" => "Sex",
        "cp" => "Chest pain type",
        "trestbps" => "Resting blood pressure",
        "chol" => "Serum cholesterol",
        "fbs" => "Fasting blood sugar > 120 mg/dl",
        "restecg" => "Resting ECG",
        "thalach" => "Maximum heart rate achieved",
        "exang" => "Exercise induced angina",
        "oldpeak" => "ST depression induced by exercise",
        "slope" => "Slope of peak exercise ST segment",
        "ca" => "Major vessels colored by fluoroscopy",
        "thal" => "Thalassemia",
        _ => "Unknown feature",
    }
}

fn normalize(label: &str) -> String {
    label
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(try_from = "String")]
pub enum Sex {
    #[default]
    Male,
    Female,
}

impl Sex {
    pub fn code(self) -> f64 {
        match self {
            Sex::Male => 1.0,
            Sex::Female => 0.0,
        }
    }
}

impl FromStr for Sex {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "male" | "m" => Ok(Sex::Male),
            "female" | "f" => Ok(Sex::Female),
            _ => Err(format!("unknown sex: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(try_from = "String")]
pub enum ChestPain {
    #[default]
    #[serde(rename = "Typical Angina")]
    TypicalAngina,
    #[serde(rename = "Atypical Angina")]
    AtypicalAngina,
    #[serde(rename = "Non-anginal Pain")]
    NonAnginalPain,
    #[serde(rename = "Asymptomatic")]
    Asymptomatic,
}

impl ChestPain {
    pub const ALL: [ChestPain; 4] = [
        ChestPain::TypicalAngina,
        ChestPain::AtypicalAngina,
        ChestPain::NonAnginalPain,
        ChestPain::Asymptomatic,
    ];

    pub fn code(self) -> f64 {
        match self {
            ChestPain::TypicalAngina => 1.0,
            ChestPain::AtypicalAngina => 2.0,
            ChestPain::NonAnginalPain => 3.0,
            ChestPain::Asymptomatic => 4.0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ChestPain::TypicalAngina => "Typical Angina",
            ChestPain::AtypicalAngina => "Atypical Angina",
            ChestPain::NonAnginalPain => "Non-anginal Pain",
            ChestPain::Asymptomatic => "Asymptomatic",
        }
    }

    /// Unknown labels are treated as asymptomatic.
    pub fn from_label_or_default(label: &str) -> Self {
        label.parse().unwrap_or_else(|_| {
            warn!(label, "unknown chest pain label, using Asymptomatic");
            ChestPain::Asymptomatic
        })
    }
}

impl FromStr for ChestPain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let n = normalize(s);
        ChestPain::ALL
            .into_iter()
            .find(|v| normalize(v.label()) == n)
            .ok_or_else(|| format!("unknown chest pain type: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(try_from = "String")]
pub enum RestingEcg {
    #[default]
    #[serde(rename = "Normal")]
    Normal,
    #[serde(rename = "ST-T abnormality")]
    StTAbnormality,
    #[serde(rename = "LV hypertrophy")]
    LvHypertrophy,
}

impl RestingEcg {
    pub const ALL: [RestingEcg; 3] = [
        RestingEcg::Normal,
        RestingEcg::StTAbnormality,
        RestingEcg::LvHypertrophy,
    ];

    pub fn code(self) -> f64 {
        match self {
            RestingEcg::Normal => 0.0,
            RestingEcg::StTAbnormality => 1.0,
            RestingEcg::LvHypertrophy => 2.0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            RestingEcg::Normal => "Normal",
            RestingEcg::StTAbnormality => "ST-T abnormality",
            RestingEcg::LvHypertrophy => "LV hypertrophy",
        }
    }

    pub fn from_label_or_default(label: &str) -> Self {
        label.parse().unwrap_or_else(|_| {
            warn!(label, "unknown resting ECG label, using Normal");
            RestingEcg::Normal
        })
    }
}

impl FromStr for RestingEcg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let n = normalize(s);
        RestingEcg::ALL
            .into_iter()
            .find(|v| normalize(v.label()) == n)
            .ok_or_else(|| format!("unknown resting ECG result: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(try_from = "String")]
pub enum StSlope {
    #[default]
    #[serde(rename = "Upsloping")]
    Upsloping,
    #[serde(rename = "Flat")]
    Flat,
    #[serde(rename = "Downsloping")]
    Downsloping,
}

impl StSlope {
    pub const ALL: [StSlope; 3] = [StSlope::Upsloping, StSlope::Flat, StSlope::Downsloping];

    pub fn code(self) -> f64 {
        match self {
            StSlope::Upsloping => 1.0,
            StSlope::Flat => 2.0,
            StSlope::Downsloping => 3.0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            StSlope::Upsloping => "Upsloping",
            StSlope::Flat => "Flat",
            StSlope::Downsloping => "Downsloping",
        }
    }

    pub fn from_label_or_default(label: &str) -> Self {
        label.parse().unwrap_or_else(|_| {
            warn!(label, "unknown ST slope label, using Flat");
            StSlope::Flat
        })
    }
}

impl FromStr for StSlope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let n = normalize(s);
        StSlope::ALL
            .into_iter()
            .find(|v| normalize(v.label()) == n)
            .ok_or_else(|| format!("unknown ST slope: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(try_from = "String")]
pub enum Thalassemia {
    #[default]
    #[serde(rename = "Normal")]
    Normal,
    #[serde(rename = "Fixed Defect")]
    FixedDefect,
    #[serde(rename = "Reversible Defect")]
    ReversibleDefect,
}

impl Thalassemia {
    pub const ALL: [Thalassemia; 3] = [
        Thalassemia::Normal,
        Thalassemia::FixedDefect,
        Thalassemia::ReversibleDefect,
    ];

    pub fn code(self) -> f64 {
        match self {
            Thalassemia::Normal => 3.0,
            Thalassemia::FixedDefect => 6.0,
            Thalassemia::ReversibleDefect => 7.0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Thalassemia::Normal => "Normal",
            Thalassemia::FixedDefect => "Fixed Defect",
            Thalassemia::ReversibleDefect => "Reversible Defect",
        }
    }

    pub fn from_label_or_default(label: &str) -> Self {
        label.parse().unwrap_or_else(|_| {
            warn!(label, "unknown thalassemia label, using Normal");
            Thalassemia::Normal
        })
    }
}

impl FromStr for Thalassemia {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let n = normalize(s);
        Thalassemia::ALL
            .into_iter()
            .find(|v| normalize(v.label()) == n)
            .ok_or_else(|| format!("unknown thalassemia result: {s}"))
    }
}

/// JSON labels go through the same lenient parsing as command-line flags.
macro_rules! try_from_label {
    ($($ty:ty),+) => {$(
        impl TryFrom<String> for $ty {
            type Error = String;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                s.parse()
            }
        }
    )+};
}

try_from_label!(Sex, ChestPain, RestingEcg, StSlope, Thalassemia);

/// Accepts a JSON bool or the strings "Yes"/"No".
fn deserialize_yes_no<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum YesNo {
        Bool(bool),
        Text(String),
    }
    match YesNo::deserialize(deserializer)? {
        YesNo::Bool(b) => Ok(b),
        YesNo::Text(s) => parse_yes_no(&s).map_err(serde::de::Error::custom),
    }
}

pub fn parse_yes_no(s: &str) -> Result<bool, String> {
    match normalize(s).as_str() {
        "yes" | "y" | "true" | "1" => Ok(true),
        "no" | "n" | "false" | "0" => Ok(false),
        _ => Err(format!("expected yes or no, got {s}")),
    }
}

/// Clinical form values for one patient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatientInput {
    pub age: u32,
    pub sex: Sex,
    pub chest_pain: ChestPain,
    /// Resting blood pressure, mmHg.
    pub resting_bp: u32,
    /// Serum cholesterol, mg/dl.
    pub cholesterol: u32,
    pub max_heart_rate: u32,
    /// Fasting blood sugar, mg/dl.
    pub fasting_glucose: u32,
    pub resting_ecg: RestingEcg,
    #[serde(deserialize_with = "deserialize_yes_no")]
    pub exercise_angina: bool,
    pub st_depression: f64,
    pub st_slope: StSlope,
    pub major_vessels: u32,
    pub thalassemia: Thalassemia,
}

impl Default for PatientInput {
    fn default() -> Self {
        Self {
            age: 45,
            sex: Sex::Male,
            chest_pain: ChestPain::TypicalAngina,
            resting_bp: 120,
            cholesterol: 190,
            max_heart_rate: 150,
            fasting_glucose: 100,
            resting_ecg: RestingEcg::Normal,
            exercise_angina: false,
            st_depression: 1.0,
            st_slope: StSlope::Upsloping,
            major_vessels: 0,
            thalassemia: Thalassemia::Normal,
        }
    }
}

fn check(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), RiskError> {
    if !value.is_finite() || value < min || value > max {
        return Err(RiskError::InvalidInput {
            field,
            value,
            min,
            max,
        });
    }
    Ok(())
}

impl PatientInput {
    pub fn validate(&self) -> Result<(), RiskError> {
        check("age", self.age as f64, 1.0, 100.0)?;
        check("resting_bp", self.resting_bp as f64, 80.0, 200.0)?;
        check("cholesterol", self.cholesterol as f64, 100.0, 400.0)?;
        check("max_heart_rate", self.max_heart_rate as f64, 40.0, 200.0)?;
        check("fasting_glucose", self.fasting_glucose as f64, 50.0, 300.0)?;
        check("st_depression", self.st_depression, 0.0, 6.0)?;
        check("major_vessels", self.major_vessels as f64, 0.0, 4.0)?;
        Ok(())
    }

    pub fn elevated_fasting_glucose(&self) -> bool {
        self.fasting_glucose > FASTING_GLUCOSE_CUTOFF
    }

    /// 220 minus age, the usual age-predicted maximum heart rate.
    pub fn predicted_max_heart_rate(&self) -> u32 {
        220u32.saturating_sub(self.age)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    values: [f64; FEATURE_COUNT],
}

impl FeatureVector {
    pub fn new(values: [f64; FEATURE_COUNT]) -> Self {
        Self { values }
    }

    pub fn from_slice(values: &[f64]) -> Result<Self, RiskError> {
        let values: [f64; FEATURE_COUNT] = values.try_into().map_err(|_| {
            RiskError::Prediction(format!(
                "expected {} features, got {}",
                FEATURE_COUNT,
                values.len()
            ))
        })?;
        Ok(Self { values })
    }

    pub fn values(&self) -> &[f64; FEATURE_COUNT] {
        &self.values
    }

    pub fn get(&self, name: &str) -> Result<f64, RiskError> {
        Ok(self.values[feature_index(name)?])
    }

    pub fn len(&self) -> usize {
        FEATURE_COUNT
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

impl fmt::Display for FeatureVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = FEATURE_COLUMNS
            .iter()
            .zip(self.values.iter())
            .map(|(n, v)| format!("{n}={v}"))
            .collect();
        write!(f, "{}", parts.join(" "))
    }
}

/// Encodes the form values in `FEATURE_COLUMNS` order.
pub fn preprocess(input: &PatientInput) -> FeatureVector {
    FeatureVector::new([
        input.age as f64,
        input.sex.code(),
        input.chest_pain.code(),
        input.resting_bp as f64,
        input.cholesterol as f64,
        if input.elevated_fasting_glucose() { 1.0 } else { 0.0 },
        input.resting_ecg.code(),
        input.max_heart_rate as f64,
        if input.exercise_angina { 1.0 } else { 0.0 },
        input.st_depression,
        input.st_slope.code(),
        input.major_vessels as f64,
        input.thalassemia.code(),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_form_encodes_like_the_widgets() {
        let v = preprocess(&PatientInput::default());
        assert_eq!(
            v.values(),
            &[45.0, 1.0, 1.0, 120.0, 190.0, 0.0, 0.0, 150.0, 0.0, 1.0, 1.0, 0.0, 3.0]
        );
    }

    #[test]
    fn categorical_codes_follow_cleveland_encoding() {
        let input = PatientInput {
            sex: Sex::Female,
            chest_pain: ChestPain::Asymptomatic,
            fasting_glucose: 121,
            resting_ecg: RestingEcg::LvHypertrophy,
            exercise_angina: true,
            st_slope: StSlope::Downsloping,
            thalassemia: Thalassemia::ReversibleDefect,
            ..PatientInput::default()
        };
        let v = preprocess(&input);
        assert_eq!(v.get("sex").unwrap(), 0.0);
        assert_eq!(v.get("cp").unwrap(), 4.0);
        assert_eq!(v.get("fbs").unwrap(), 1.0);
        assert_eq!(v.get("restecg").unwrap(), 2.0);
        assert_eq!(v.get("exang").unwrap(), 1.0);
        assert_eq!(v.get("slope").unwrap(), 3.0);
        assert_eq!(v.get("thal").unwrap(), 7.0);
    }

    #[test]
    fn glucose_of_exactly_120_is_not_elevated() {
        let input = PatientInput {
            fasting_glucose: 120,
            ..PatientInput::default()
        };
        assert_eq!(preprocess(&input).get("fbs").unwrap(), 0.0);
    }

    #[test]
    fn validate_rejects_out_of_range_fields() {
        let input = PatientInput {
            cholesterol: 401,
            ..PatientInput::default()
        };
        match input.validate() {
            Err(RiskError::InvalidInput { field, .. }) => assert_eq!(field, "cholesterol"),
            other => panic!("unexpected {other:?}"),
        }
        let input = PatientInput {
            st_depression: f64::NAN,
            ..PatientInput::default()
        };
        assert!(input.validate().is_err());
        assert!(PatientInput::default().validate().is_ok());
    }

    #[test]
    fn labels_parse_loosely_and_unknowns_fall_back() {
        assert_eq!(
            "non-anginal pain".parse::<ChestPain>().unwrap(),
            ChestPain::NonAnginalPain
        );
        assert_eq!("st-t-abnormality".parse::<RestingEcg>().unwrap(), RestingEcg::StTAbnormality);
        assert!("sharp".parse::<ChestPain>().is_err());
        assert_eq!(ChestPain::from_label_or_default("sharp"), ChestPain::Asymptomatic);
        assert_eq!(RestingEcg::from_label_or_default("?"), RestingEcg::Normal);
        assert_eq!(StSlope::from_label_or_default("?"), StSlope::Flat);
        assert_eq!(Thalassemia::from_label_or_default("?"), Thalassemia::Normal);
    }

    #[test]
    fn json_input_accepts_labels_and_yes_no() {
        let json = r#"{
            "age": 63, "sex": "Male", "chest_pain": "Asymptomatic",
            "resting_bp": 145, "cholesterol": 233, "exercise_angina": "Yes",
            "thalassemia": "Fixed Defect"
        }"#;
        let input: PatientInput = serde_json::from_str(json).unwrap();
        assert_eq!(input.age, 63);
        assert!(input.exercise_angina);
        assert_eq!(input.thalassemia, Thalassemia::FixedDefect);
        // unspecified fields keep form defaults
        assert_eq!(input.max_heart_rate, 150);
    }

    #[test]
    fn json_labels_ignore_case_and_spacing() {
        let json = r#"{
            "sex": "MALE", "chest_pain": "non-anginal pain",
            "resting_ecg": "st-t abnormality", "st_slope": "FLAT",
            "thalassemia": "reversible-defect"
        }"#;
        let input: PatientInput = serde_json::from_str(json).unwrap();
        assert_eq!(input.sex, Sex::Male);
        assert_eq!(input.chest_pain, ChestPain::NonAnginalPain);
        assert_eq!(input.resting_ecg, RestingEcg::StTAbnormality);
        assert_eq!(input.st_slope, StSlope::Flat);
        assert_eq!(input.thalassemia, Thalassemia::ReversibleDefect);

        let err = serde_json::from_str::<PatientInput>(r#"{"chest_pain": "sharp"}"#).unwrap_err();
        assert!(err.to_string().contains("unknown chest pain type"));
    }

    #[test]
    fn labels_serialize_as_display_text() {
        let json = serde_json::to_value(PatientInput::default()).unwrap();
        assert_eq!(json["chest_pain"], "Typical Angina");
        assert_eq!(json["sex"], "Male");
        let back: PatientInput = serde_json::from_value(json).unwrap();
        assert_eq!(back, PatientInput::default());
    }

    #[test]
    fn unknown_feature_name_is_an_error() {
        let v = preprocess(&PatientInput::default());
        assert!(matches!(v.get("bmi"), Err(RiskError::UnknownFeature(_))));
        assert_eq!(feature_index("thal").unwrap(), 12);
    }
}
