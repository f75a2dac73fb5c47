//! File envelope data model shared by every pipeline stage.
//!
//! An envelope wraps one file's metadata and (optionally inline) binary
//! content as it moves between stages. The `fileCacheDataObject` is kept as
//! raw JSON so pass-through never loses fields this crate does not know
//! about; typed access goes through the accessor methods.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Error type for envelope parsing and validation.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// Input is not a well-formed array of envelope objects.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// Wrong number of envelopes for the stage's contract.
    #[error("cardinality violation: expected {expected} envelopes, got {actual}")]
    CardinalityViolation { expected: usize, actual: usize },

    /// Wrong number of extracted envelopes inside a container.
    #[error("cardinality violation: expected {expected} extracted envelopes, got {actual}")]
    ExtractedCardinalityViolation { expected: usize, actual: usize },

    /// The envelope's file cache data carries no file name.
    #[error("envelope has no file name")]
    MissingFileName,

    /// The envelope carries no inline binary content.
    #[error("envelope '{0}' has no inline binary content")]
    MissingContent(String),

    /// The inline binary content is not valid base64.
    #[error("invalid base64 payload: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
}

/// One file moving through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    /// Metadata + content descriptor for the file, kept as raw JSON.
    #[serde(rename = "fileCacheDataObject")]
    pub file_cache_data_object: Value,

    /// Files extracted from this envelope when it is a container.
    ///
    /// Optional on input (absence is treated as empty), always present on
    /// output.
    #[serde(rename = "extractedFileCacheDataObject", default)]
    pub extracted_file_cache_data_object: Vec<Envelope>,
}

impl Envelope {
    /// Create a leaf envelope (empty extracted sequence) from file cache data.
    pub fn new(file_cache_data_object: Value) -> Self {
        Self {
            file_cache_data_object,
            extracted_file_cache_data_object: Vec::new(),
        }
    }

    /// The file name recorded in the cache data.
    pub fn file_name(&self) -> Result<&str, EnvelopeError> {
        self.file_cache_data_object
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or(EnvelopeError::MissingFileName)
    }

    /// Whether the file name ends with the given extension (case-insensitive).
    pub fn matches_extension(&self, extension: &str) -> Result<bool, EnvelopeError> {
        let name = self.file_name()?;
        Ok(name.to_lowercase().ends_with(&extension.to_lowercase()))
    }

    /// Decode the inline binary payload from `fileContent.binaryData`.
    pub fn binary_content(&self) -> Result<Vec<u8>, EnvelopeError> {
        let encoded = self
            .file_cache_data_object
            .get("fileContent")
            .and_then(|c| c.get("binaryData"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                EnvelopeError::MissingContent(self.file_name().unwrap_or("<unnamed>").to_string())
            })?;
        Ok(BASE64.decode(encoded)?)
    }

    /// Build the pass-through version of this envelope: the original
    /// `fileCacheDataObject` untouched plus an explicit empty extracted
    /// sequence.
    pub fn pass_through(&self) -> Envelope {
        Envelope {
            file_cache_data_object: self.file_cache_data_object.clone(),
            extracted_file_cache_data_object: Vec::new(),
        }
    }
}

/// Build a `fileCacheDataObject` value with an inline base64 payload.
pub fn file_cache_data(
    name: &str,
    extension: &str,
    mime_type: Option<&str>,
    content: &[u8],
) -> Value {
    let mut data = json!({
        "name": name,
        "extension": extension,
        "fileContent": { "binaryData": BASE64.encode(content) },
    });
    if let Some(mime) = mime_type {
        data["mimeType"] = json!(mime);
    }
    data
}

/// Parse a stage's input into an ordered envelope sequence.
///
/// Fails with `MalformedInput` unless the input is a JSON array whose every
/// element is an object carrying a `fileCacheDataObject` object. A missing
/// `extractedFileCacheDataObject` is tolerated and treated as empty.
pub fn parse_envelope_array(input: &str) -> Result<Vec<Envelope>, EnvelopeError> {
    let value: Value = serde_json::from_str(input)
        .map_err(|e| EnvelopeError::MalformedInput(e.to_string()))?;

    let elements = value
        .as_array()
        .ok_or_else(|| EnvelopeError::MalformedInput("expected a JSON array".to_string()))?;

    let envelopes: Vec<Envelope> = serde_json::from_value(Value::Array(elements.clone()))
        .map_err(|e| EnvelopeError::MalformedInput(e.to_string()))?;

    for envelope in &envelopes {
        validate_envelope(envelope)?;
    }

    Ok(envelopes)
}

/// Check that the cache data is an object, recursively through containers.
fn validate_envelope(envelope: &Envelope) -> Result<(), EnvelopeError> {
    if !envelope.file_cache_data_object.is_object() {
        return Err(EnvelopeError::MalformedInput(
            "fileCacheDataObject must be an object".to_string(),
        ));
    }
    for extracted in &envelope.extracted_file_cache_data_object {
        validate_envelope(extracted)?;
    }
    Ok(())
}

/// Stage-specific shape invariant for the input envelope sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// Any number of envelopes.
    Any,
    /// Exactly this many envelopes.
    Exactly(usize),
    /// Exactly `containers` container envelopes, each with exactly
    /// `extracted` extracted envelopes.
    ContainerWithExtracted { containers: usize, extracted: usize },
}

impl Cardinality {
    /// Validate an envelope sequence against this invariant.
    pub fn check(&self, envelopes: &[Envelope]) -> Result<(), EnvelopeError> {
        match self {
            Cardinality::Any => Ok(()),
            Cardinality::Exactly(expected) => {
                if envelopes.len() != *expected {
                    return Err(EnvelopeError::CardinalityViolation {
                        expected: *expected,
                        actual: envelopes.len(),
                    });
                }
                Ok(())
            }
            Cardinality::ContainerWithExtracted {
                containers,
                extracted,
            } => {
                if envelopes.len() != *containers {
                    return Err(EnvelopeError::CardinalityViolation {
                        expected: *containers,
                        actual: envelopes.len(),
                    });
                }
                for envelope in envelopes {
                    let actual = envelope.extracted_file_cache_data_object.len();
                    if actual != *extracted {
                        return Err(EnvelopeError::ExtractedCardinalityViolation {
                            expected: *extracted,
                            actual,
                        });
                    }
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn envelope_json(name: &str, payload: &[u8]) -> String {
        serde_json::to_string(&Envelope::new(file_cache_data(
            name,
            name.rsplit('.').next().unwrap_or(""),
            None,
            payload,
        )))
        .unwrap()
    }

    #[test]
    fn test_parse_single_envelope() {
        let input = format!("[{}]", envelope_json("track.wav", b"RIFF"));
        let envelopes = parse_envelope_array(&input).expect("should parse");

        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].file_name().unwrap(), "track.wav");
        assert_eq!(envelopes[0].binary_content().unwrap(), b"RIFF");
        assert!(envelopes[0].extracted_file_cache_data_object.is_empty());
    }

    #[test]
    fn test_parse_tolerates_missing_extracted_field() {
        let input = r#"[{"fileCacheDataObject": {"name": "meta.json"}}]"#;
        let envelopes = parse_envelope_array(input).expect("should parse");

        assert_eq!(envelopes.len(), 1);
        assert!(envelopes[0].extracted_file_cache_data_object.is_empty());
    }

    #[test]
    fn test_parse_rejects_non_array() {
        let err = parse_envelope_array(r#"{"fileCacheDataObject": {}}"#).unwrap_err();
        assert!(matches!(err, EnvelopeError::MalformedInput(_)));
    }

    #[test]
    fn test_parse_rejects_invalid_json() {
        let err = parse_envelope_array("not json at all").unwrap_err();
        assert!(matches!(err, EnvelopeError::MalformedInput(_)));
    }

    #[test]
    fn test_parse_rejects_non_object_cache_data() {
        let err = parse_envelope_array(r#"[{"fileCacheDataObject": 42}]"#).unwrap_err();
        assert!(matches!(err, EnvelopeError::MalformedInput(_)));
    }

    #[test]
    fn test_matches_extension_case_insensitive() {
        let envelope = Envelope::new(file_cache_data("Track.WAV", ".wav", None, b""));
        assert!(envelope.matches_extension(".wav").unwrap());
        assert!(envelope.matches_extension(".WAV").unwrap());
        assert!(!envelope.matches_extension(".mp3").unwrap());
    }

    #[test]
    fn test_missing_file_name() {
        let envelope = Envelope::new(json!({"extension": ".wav"}));
        assert!(matches!(
            envelope.file_name(),
            Err(EnvelopeError::MissingFileName)
        ));
    }

    #[test]
    fn test_missing_content() {
        let envelope = Envelope::new(json!({"name": "ref.wav", "contentRef": "cache://abc"}));
        assert!(matches!(
            envelope.binary_content(),
            Err(EnvelopeError::MissingContent(_))
        ));
    }

    #[test]
    fn test_pass_through_preserves_unknown_fields() {
        let input = r#"[{"fileCacheDataObject": {"name": "x.bin", "customField": {"a": 1}}, "extractedFileCacheDataObject": []}]"#;
        let envelopes = parse_envelope_array(input).unwrap();
        let passed = envelopes[0].pass_through();

        assert_eq!(passed.file_cache_data_object, envelopes[0].file_cache_data_object);
        assert_eq!(
            passed.file_cache_data_object["customField"]["a"],
            json!(1)
        );
        assert!(passed.extracted_file_cache_data_object.is_empty());
    }

    #[test]
    fn test_cardinality_exactly() {
        let envelopes = vec![
            Envelope::new(file_cache_data("a.wav", ".wav", None, b"")),
            Envelope::new(file_cache_data("b.wav", ".wav", None, b"")),
        ];

        assert!(Cardinality::Exactly(2).check(&envelopes).is_ok());

        let err = Cardinality::Exactly(3).check(&envelopes).unwrap_err();
        match err {
            EnvelopeError::CardinalityViolation { expected, actual } => {
                assert_eq!(expected, 3);
                assert_eq!(actual, 2);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_cardinality_container_with_extracted() {
        let mut container = Envelope::new(file_cache_data("bundle.zip", ".zip", None, b""));
        container.extracted_file_cache_data_object = vec![
            Envelope::new(file_cache_data("meta.json", ".json", None, b"{}")),
            Envelope::new(file_cache_data("track.wav", ".wav", None, b"RIFF")),
        ];
        let envelopes = vec![container];

        let rule = Cardinality::ContainerWithExtracted {
            containers: 1,
            extracted: 2,
        };
        assert!(rule.check(&envelopes).is_ok());

        let strict = Cardinality::ContainerWithExtracted {
            containers: 1,
            extracted: 3,
        };
        assert!(matches!(
            strict.check(&envelopes),
            Err(EnvelopeError::ExtractedCardinalityViolation { expected: 3, actual: 2 })
        ));
    }

    #[test]
    fn test_error_message_names_expected_and_actual() {
        let err = EnvelopeError::CardinalityViolation {
            expected: 2,
            actual: 5,
        };
        let msg = err.to_string();
        assert!(msg.contains('2'));
        assert!(msg.contains('5'));
    }

    // *For any* envelope sequence serialized and re-parsed, the order and
    // file names are preserved and every payload round-trips through base64.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_envelope_array_round_trip(
            names in prop::collection::vec("[a-z0-9]{1,12}\\.(wav|json|mp3)", 0..8),
            payload in prop::collection::vec(any::<u8>(), 0..256),
        ) {
            let envelopes: Vec<Envelope> = names
                .iter()
                .map(|n| Envelope::new(file_cache_data(n, ".bin", None, &payload)))
                .collect();

            let json = serde_json::to_string(&envelopes).expect("serialize");
            let parsed = parse_envelope_array(&json).expect("parse");

            prop_assert_eq!(parsed.len(), envelopes.len());
            for (original, reparsed) in envelopes.iter().zip(parsed.iter()) {
                prop_assert_eq!(
                    original.file_name().unwrap(),
                    reparsed.file_name().unwrap()
                );
                prop_assert_eq!(reparsed.binary_content().unwrap(), payload.clone());
            }
        }

        #[test]
        fn prop_cardinality_exact_matches_length_only(
            len in 0usize..10,
            expected in 0usize..10,
        ) {
            let envelopes: Vec<Envelope> = (0..len)
                .map(|i| Envelope::new(file_cache_data(&format!("f{}.wav", i), ".wav", None, b"")))
                .collect();

            let result = Cardinality::Exactly(expected).check(&envelopes);
            prop_assert_eq!(result.is_ok(), len == expected);
        }
    }
}
