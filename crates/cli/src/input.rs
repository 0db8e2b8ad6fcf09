//! Patient input from command-line flags or a JSON file.

use anyhow::{anyhow, Context};
use clap::Args;
use medirisk_core::features::{
    parse_yes_no, ChestPain, PatientInput, RestingEcg, Sex, StSlope, Thalassemia,
};
use std::fs;
use std::path::Path;

#[derive(Args, Debug, Clone)]
pub struct PatientArgs {
    /// Read the patient from a JSON file instead of the flags below
    #[arg(long)]
    pub input: Option<String>,
    #[arg(long, default_value_t = 45)]
    pub age: u32,
    /// Male or Female
    #[arg(long, default_value = "Male")]
    pub sex: String,
    /// Typical Angina, Atypical Angina, Non-anginal Pain or Asymptomatic
    #[arg(long, default_value = "Typical Angina")]
    pub chest_pain: String,
    /// Resting blood pressure (mmHg)
    #[arg(long, default_value_t = 120)]
    pub resting_bp: u32,
    /// Serum cholesterol (mg/dl)
    #[arg(long, default_value_t = 190)]
    pub cholesterol: u32,
    #[arg(long, default_value_t = 150)]
    pub max_heart_rate: u32,
    /// Fasting blood sugar (mg/dl)
    #[arg(long, default_value_t = 100)]
    pub fasting_glucose: u32,
    /// Normal, ST-T abnormality or LV hypertrophy
    #[arg(long, default_value = "Normal")]
    pub resting_ecg: String,
    /// Yes or No
    #[arg(long, default_value = "No")]
    pub exercise_angina: String,
    #[arg(long, default_value_t = 1.0)]
    pub st_depression: f64,
    /// Upsloping, Flat or Downsloping
    #[arg(long, default_value = "Upsloping")]
    pub st_slope: String,
    #[arg(long, default_value_t = 0)]
    pub major_vessels: u32,
    /// Normal, Fixed Defect or Reversible Defect
    #[arg(long, default_value = "Normal")]
    pub thalassemia: String,
}

impl PatientArgs {
    pub fn to_input(&self) -> anyhow::Result<PatientInput> {
        if let Some(path) = &self.input {
            return load_input(Path::new(path));
        }
        Ok(PatientInput {
            age: self.age,
            sex: self.sex.parse::<Sex>().map_err(|e| anyhow!(e))?,
            chest_pain: ChestPain::from_label_or_default(&self.chest_pain),
            resting_bp: self.resting_bp,
            cholesterol: self.cholesterol,
            max_heart_rate: self.max_heart_rate,
            fasting_glucose: self.fasting_glucose,
            resting_ecg: RestingEcg::from_label_or_default(&self.resting_ecg),
            exercise_angina: parse_yes_no(&self.exercise_angina).map_err(|e| anyhow!(e))?,
            st_depression: self.st_depression,
            st_slope: StSlope::from_label_or_default(&self.st_slope),
            major_vessels: self.major_vessels,
            thalassemia: Thalassemia::from_label_or_default(&self.thalassemia),
        })
    }
}

pub fn load_input(path: &Path) -> anyhow::Result<PatientInput> {
    let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parse patient json {}", path.display()))
}
