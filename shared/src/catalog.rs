//! Fixed question catalog.
//!
//! Each question shows one anatomical model and asks a four-option question
//! about it. The order here is the order of play.

use std::collections::HashSet;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    /// Stable id used as the key in `answers[player]`
    pub id: &'static str,
    pub title: &'static str,
    pub prompt: &'static str,
    pub model_url: &'static str,
    pub options: [&'static str; 4],
    pub correct_index: usize,
    /// Largest model extent after normalization, overrides the default
    pub fit: Option<f64>,
    /// Euler rotation (radians, XYZ order) applied after normalization
    pub rotation: Option<[f64; 3]>,
}

impl Question {
    pub fn is_correct(&self, option: usize) -> bool {
        option == self.correct_index
    }

    pub fn fit_or(&self, default_fit: f64) -> f64 {
        self.fit.unwrap_or(default_fit)
    }

    pub fn rotation_or_default(&self) -> [f64; 3] {
        self.rotation.unwrap_or([0.0; 3])
    }
}

pub const QUESTIONS: &[Question] = &[
    Question {
        id: "stomach",
        title: "Stomach",
        prompt: "Which acid does the stomach use to digest food?",
        model_url: "/organs/realistic_human_stomach.glb",
        options: [
            "Sulfuric acid",
            "Phosphoric acid",
            "Hydrochloric acid (HCl)",
            "Nitric acid",
        ],
        correct_index: 2,
        fit: Some(1.7),
        rotation: None,
    },
    Question {
        id: "heart",
        title: "Heart",
        prompt: "Which part of the heart pumps blood to the whole body?",
        model_url: "/organs/realistic_human_heart.glb",
        options: [
            "Right atrium",
            "Left ventricle",
            "Left atrium",
            "Right ventricle",
        ],
        correct_index: 1,
        fit: None,
        rotation: None,
    },
    Question {
        id: "lungs",
        title: "Lungs",
        prompt: "What happens in the alveoli of the lungs?",
        model_url: "/organs/realistic_human_lungs.glb",
        options: [
            "Gas exchange between air and blood",
            "Hormone production",
            "Blood filtration",
            "Food digestion",
        ],
        correct_index: 0,
        fit: None,
        rotation: None,
    },
    Question {
        id: "brain",
        title: "Brain",
        prompt: "Which part of the brain coordinates movement?",
        model_url: "/organs/human_brain.glb",
        options: [
            "Cerebral hemispheres",
            "Cerebellum",
            "Medulla oblongata",
            "Hypothalamus",
        ],
        correct_index: 1,
        fit: None,
        rotation: None,
    },
    Question {
        id: "kidney",
        title: "Kidney",
        prompt: "The main function of the kidneys is...",
        model_url: "/organs/medicine_organ_-_the_human_kidney.glb",
        options: [
            "Hormone secretion",
            "Protein synthesis",
            "Filtering blood and producing urine",
            "Producing bile",
        ],
        correct_index: 2,
        fit: None,
        rotation: None,
    },
    Question {
        id: "liver",
        title: "Liver",
        prompt: "Which organ produces bile?",
        model_url: "/organs/human_liver_and_gallbladder.glb",
        options: ["Gallbladder", "Liver", "Pancreas", "Kidney"],
        correct_index: 1,
        fit: None,
        rotation: None,
    },
    Question {
        id: "small_intestine",
        title: "Small intestine",
        prompt: "What mainly happens in the small intestine?",
        model_url: "/organs/small_and_large_intestine.glb",
        options: [
            "Nutrient absorption",
            "Water absorption",
            "Gas exchange",
            "Blood filtration",
        ],
        correct_index: 0,
        fit: None,
        rotation: None,
    },
    Question {
        id: "large_intestine",
        title: "Large intestine",
        prompt: "The main function of the large intestine is...",
        model_url: "/organs/small_and_large_intestine.glb",
        options: [
            "Nutrient absorption",
            "Water absorption",
            "Hormone secretion",
            "Enzyme production",
        ],
        correct_index: 1,
        fit: None,
        rotation: None,
    },
    Question {
        id: "skin",
        title: "Skin",
        prompt: "In which skin layer are the sweat glands located?",
        model_url: "/organs/spotted_skin.glb",
        options: [
            "Epidermis",
            "Dermis",
            "Subcutaneous tissue",
            "Stratum corneum",
        ],
        correct_index: 1,
        fit: None,
        rotation: None,
    },
    Question {
        id: "eye",
        title: "Eye",
        prompt: "Which part of the eye focuses light onto the retina?",
        model_url: "/organs/anatomi_mata_eye_anatomy.glb",
        options: ["Pupil", "Lens", "Cornea", "Retina"],
        correct_index: 1,
        fit: None,
        rotation: None,
    },
];

/// Question at a play position, `None` once the catalog is exhausted.
pub fn question_at(catalog: &[Question], index: usize) -> Option<&Question> {
    catalog.get(index)
}

pub fn question_by_id<'a>(catalog: &'a [Question], id: &str) -> Option<&'a Question> {
    catalog.iter().find(|q| q.id == id)
}

/// Distinct model URLs in play order, for warming a renderer's asset cache.
pub fn unique_model_urls(catalog: &[Question]) -> Vec<&'static str> {
    let mut seen = HashSet::new();
    catalog
        .iter()
        .map(|q| q.model_url)
        .filter(|url| seen.insert(*url))
        .collect()
}

pub fn validate_catalog(catalog: &[Question]) -> Result<(), String> {
    if catalog.is_empty() {
        return Err("question catalog is empty".to_string());
    }
    let mut ids = HashSet::new();
    for q in catalog {
        if q.id.is_empty() {
            return Err(format!("question '{}' has an empty id", q.title));
        }
        if !ids.insert(q.id) {
            return Err(format!("duplicate question id '{}'", q.id));
        }
        if q.correct_index >= q.options.len() {
            return Err(format!(
                "question '{}' correct_index {} out of range",
                q.id, q.correct_index
            ));
        }
        if let Some(fit) = q.fit {
            if !fit.is_finite() || fit <= 0.0 {
                return Err(format!("question '{}' fit must be finite and > 0", q.id));
            }
        }
    }
    Ok(())
}
