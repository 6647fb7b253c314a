use log::info;
use serde::Serialize;

use fc_core::Result;
use fc_core::stages::SpeechSynth;

use crate::{check_status, http_client, request_failed};

const SERVICE: &str = "TTS service";

#[derive(Serialize)]
struct SynthesizeRequest<'a> {
    text: &'a str,
    lang: &'a str,
}

/// Text-to-speech behind an HTTP service answering `POST /synthesize` with
/// encoded audio (MP3 or WAV).
#[derive(Debug, Clone)]
pub struct HttpSpeechSynth {
    base_url: String,
    lang: String,
}

impl HttpSpeechSynth {
    pub fn new(base_url: impl Into<String>, lang: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            lang: lang.into(),
        }
    }
}

impl SpeechSynth for HttpSpeechSynth {
    fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        info!("Generating voiceover ({} chars, lang {})", text.chars().count(), self.lang);

        let response = http_client()?
            .post(format!("{}/synthesize", self.base_url))
            .json(&SynthesizeRequest {
                text,
                lang: &self.lang,
            })
            .send()
            .map_err(|e| request_failed(SERVICE, e))?;

        let bytes = check_status(SERVICE, response)?
            .bytes()
            .map_err(|e| request_failed(SERVICE, e))?;

        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_server::serve_once;

    #[test]
    fn test_returns_audio_bytes() {
        let (url, seen) = serve_once(200, "audio/mpeg", b"ID3fake".to_vec());
        let tts = HttpSpeechSynth::new(format!("{url}/"), "en");

        assert_eq!(tts.synthesize("Hello there").unwrap(), b"ID3fake");

        let seen = seen.recv().unwrap();
        assert_eq!(seen.path, "/synthesize");
        assert_eq!(seen.body["text"], "Hello there");
        assert_eq!(seen.body["lang"], "en");
    }
}
