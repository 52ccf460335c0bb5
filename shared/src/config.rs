/// Default largest model extent when a question has no fit override.
pub const DEFAULT_FIT: f64 = 2.8;

/// Feedback survey linked from the results screen.
pub const DEFAULT_SURVEY_URL: &str = "https://forms.gle/HeEY1vd9XLe9GE8Q6";

/// Quiz rules shared by every client in a room.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, ts_rs::TS)]
#[ts(export, export_to = "../../web/src/generated/")]
#[serde(rename_all = "camelCase")]
pub struct QuizConfig {
    /// Players required before "start" is allowed without the solo override
    pub min_players_to_start: usize,
    pub default_fit: f64,
    pub survey_url: String,
}

impl Default for QuizConfig {
    fn default() -> Self {
        Self {
            min_players_to_start: 2,
            default_fit: DEFAULT_FIT,
            survey_url: DEFAULT_SURVEY_URL.to_string(),
        }
    }
}

impl QuizConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.min_players_to_start == 0 {
            return Err("min_players_to_start must be >= 1".to_string());
        }
        if !self.default_fit.is_finite() || self.default_fit <= 0.0 {
            return Err("default_fit must be finite and > 0".to_string());
        }
        if !(self.survey_url.starts_with("https://") || self.survey_url.starts_with("http://")) {
            return Err("survey_url must be an http(s) URL".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_quiz_config_is_valid() {
        let config = QuizConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.min_players_to_start, 2);
    }

    #[test]
    fn zero_min_players_invalid() {
        let config = QuizConfig {
            min_players_to_start: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn non_positive_fit_invalid() {
        let mut config = QuizConfig::default();
        config.default_fit = 0.0;
        assert!(config.validate().is_err());
        config.default_fit = f64::INFINITY;
        assert!(config.validate().is_err());
    }

    #[test]
    fn survey_url_must_be_http() {
        let mut config = QuizConfig::default();
        config.survey_url = "forms.gle/x".to_string();
        assert!(config.validate().is_err());
    }
}
