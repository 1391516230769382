use serde::{Deserialize, Serialize};

/// A generated mnemonic card, as returned by the generation API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MnemonicEntry {
    pub word: String,
    pub transcription: String,
    pub meaning: String,
    pub morphology: String,
    pub imagination: String,
    pub phonetic_link: String,
    pub connector_sentence: String,
    pub examples: Vec<String>,
    pub synonyms: Vec<String>,
    pub level: String,
    pub image_prompt: String,
}

impl MnemonicEntry {
    /// Text read aloud for this card.
    pub fn narration_text(&self) -> String {
        format!(
            "{}. {}. {}. {}",
            self.word, self.meaning, self.imagination, self.connector_sentence
        )
    }
}
