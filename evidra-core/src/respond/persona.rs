//! Response personas: fixed generation parameters and prompt emphasis per
//! audience.

use serde::{Deserialize, Serialize};

/// The requested response style.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Persona {
    #[default]
    Standard,
    Academic,
    Executive,
    Eli5,
    Technical,
    Debate,
    Legal,
    Medical,
    Creative,
}

/// Generation parameters for a persona. These feed the LLM client; the
/// response strategist's decision never depends on them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PersonaParams {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Persona {
    pub const ALL: [Persona; 9] = [
        Persona::Standard,
        Persona::Academic,
        Persona::Executive,
        Persona::Eli5,
        Persona::Technical,
        Persona::Debate,
        Persona::Legal,
        Persona::Medical,
        Persona::Creative,
    ];

    pub fn params(&self) -> PersonaParams {
        match self {
            Persona::Standard => PersonaParams {
                max_tokens: 100,
                temperature: 0.3,
            },
            Persona::Academic => PersonaParams {
                max_tokens: 200,
                temperature: 0.2,
            },
            Persona::Executive => PersonaParams {
                max_tokens: 80,
                temperature: 0.1,
            },
            Persona::Eli5 => PersonaParams {
                max_tokens: 120,
                temperature: 0.4,
            },
            Persona::Technical => PersonaParams {
                max_tokens: 250,
                temperature: 0.2,
            },
            Persona::Debate => PersonaParams {
                max_tokens: 180,
                temperature: 0.3,
            },
            Persona::Legal => PersonaParams {
                max_tokens: 180,
                temperature: 0.2,
            },
            Persona::Medical => PersonaParams {
                max_tokens: 180,
                temperature: 0.2,
            },
            Persona::Creative => PersonaParams {
                max_tokens: 160,
                temperature: 0.5,
            },
        }
    }

    /// The system-prompt emphasis injected for this persona.
    pub fn emphasis(&self) -> &'static str {
        match self {
            Persona::Standard => "Answer in a balanced, concise style.",
            Persona::Academic => {
                "Answer in a formal academic register with careful, citation-heavy prose."
            }
            Persona::Executive => {
                "Answer as an executive summary: short bullets, key takeaways first."
            }
            Persona::Eli5 => {
                "Answer in simple language a beginner understands, using everyday analogies."
            }
            Persona::Technical => {
                "Answer precisely for a technical reader; formulas and code are welcome."
            }
            Persona::Debate => {
                "Present every viewpoint found in the evidence side by side without picking a winner."
            }
            Persona::Legal => {
                "Answer carefully in formal language with appropriate hedging and disclaimers."
            }
            Persona::Medical => {
                "Answer in careful clinical language with appropriate safety caveats."
            }
            Persona::Creative => "Answer in an expressive, engaging storytelling style.",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Persona::Standard => "standard",
            Persona::Academic => "academic",
            Persona::Executive => "executive",
            Persona::Eli5 => "eli5",
            Persona::Technical => "technical",
            Persona::Debate => "debate",
            Persona::Legal => "legal",
            Persona::Medical => "medical",
            Persona::Creative => "creative",
        }
    }
}

impl std::fmt::Display for Persona {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Persona {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "standard" => Ok(Persona::Standard),
            "academic" => Ok(Persona::Academic),
            "executive" => Ok(Persona::Executive),
            "eli5" => Ok(Persona::Eli5),
            "technical" => Ok(Persona::Technical),
            "debate" => Ok(Persona::Debate),
            "legal" => Ok(Persona::Legal),
            "medical" => Ok(Persona::Medical),
            "creative" => Ok(Persona::Creative),
            other => Err(format!("unknown persona '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persona_table_values() {
        assert_eq!(Persona::Standard.params().max_tokens, 100);
        assert_eq!(Persona::Executive.params().max_tokens, 80);
        assert_eq!(Persona::Technical.params().max_tokens, 250);
        assert!((Persona::Creative.params().temperature - 0.5).abs() < 1e-6);
        assert!((Persona::Executive.params().temperature - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_parse_roundtrip() {
        for persona in Persona::ALL {
            let parsed: Persona = persona.as_str().parse().unwrap();
            assert_eq!(parsed, persona);
        }
        assert!("pirate".parse::<Persona>().is_err());
    }

    #[test]
    fn test_serde_lowercase() {
        assert_eq!(serde_json::to_string(&Persona::Eli5).unwrap(), "\"eli5\"");
        let parsed: Persona = serde_json::from_str("\"debate\"").unwrap();
        assert_eq!(parsed, Persona::Debate);
    }

    #[test]
    fn test_default_is_standard() {
        assert_eq!(Persona::default(), Persona::Standard);
    }
}
