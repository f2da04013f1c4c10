//! Tokenizer integration.

use sha2::{Digest, Sha256};
use std::path::Path;
use tokenizers::AddedToken;
use vigogne_core::{
    Result, VigogneError, DEFAULT_BOS_TOKEN, DEFAULT_EOS_TOKEN, DEFAULT_PAD_TOKEN,
    DEFAULT_UNK_TOKEN,
};

/// The tokenizer capabilities the data pipeline relies on.
pub trait TextTokenizer: Send + Sync {
    /// Encode text to token IDs, special tokens included, without truncation.
    fn encode(&self, text: &str) -> Result<Vec<u32>>;

    /// Decode token IDs back to text.
    fn decode(&self, ids: &[u32]) -> Result<String>;

    /// End-of-sequence marker appended after every response.
    fn eos_token(&self) -> &str;

    /// ID used to pad batches.
    fn pad_token_id(&self) -> u32;

    /// Vocabulary size including added tokens.
    fn vocab_size(&self) -> usize;

    /// Stable identifier of the vocabulary and special tokens, used in cache keys.
    fn fingerprint(&self) -> String;

    /// Encode and right-truncate to `max_length` tokens.
    fn tokenize(&self, text: &str, max_length: Option<usize>) -> Result<Vec<u32>> {
        let mut ids = self.encode(text)?;
        if let Some(max) = max_length {
            ids.truncate(max);
        }
        Ok(ids)
    }
}

/// Options applied when a tokenizer is loaded for fine-tuning.
#[derive(Debug, Clone, Default)]
pub struct TokenizerSetup {
    /// Register `</s>` as EOS, BOS and UNK (llama checkpoints).
    pub llama_special_tokens: bool,
}

/// Wrapper around the tokenizers library.
pub struct Tokenizer {
    inner: tokenizers::Tokenizer,
    eos_token: String,
    pad_token: String,
    pad_token_id: u32,
    num_added_tokens: usize,
}

impl std::fmt::Debug for Tokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tokenizer")
            .field("eos_token", &self.eos_token)
            .field("pad_token", &self.pad_token)
            .field("pad_token_id", &self.pad_token_id)
            .field("vocab_size", &self.vocab_size())
            .finish()
    }
}

impl Tokenizer {
    /// Load a tokenizer from a `tokenizer.json` file.
    ///
    /// Special tokens declared in a sibling `tokenizer_config.json` take
    /// precedence over the built-in lookup chains.
    pub fn from_file<P: AsRef<Path>>(path: P, setup: &TokenizerSetup) -> Result<Self> {
        let path = path.as_ref();
        let inner = tokenizers::Tokenizer::from_file(path)
            .map_err(|e| VigogneError::Tokenizer(format!("{}: {e}", path.display())))?;
        let declared = path
            .parent()
            .map(|dir| DeclaredTokens::load(&dir.join("tokenizer_config.json")))
            .transpose()?
            .unwrap_or_default();
        Self::prepare(inner, declared, setup)
    }

    /// Load a tokenizer from serialized `tokenizer.json` bytes.
    pub fn from_bytes(bytes: &[u8], setup: &TokenizerSetup) -> Result<Self> {
        let inner = tokenizers::Tokenizer::from_bytes(bytes)
            .map_err(|e| VigogneError::Tokenizer(e.to_string()))?;
        Self::prepare(inner, DeclaredTokens::default(), setup)
    }

    fn prepare(
        mut inner: tokenizers::Tokenizer,
        declared: DeclaredTokens,
        setup: &TokenizerSetup,
    ) -> Result<Self> {
        let mut num_added_tokens = 0;

        let pad_token = match declared.pad.or_else(|| find_pad_token(&inner)) {
            Some(token) => token,
            None => {
                // Llama ships without a pad token.
                let added =
                    inner.add_special_tokens(&[AddedToken::from(DEFAULT_PAD_TOKEN, true)]);
                tracing::info!(
                    token = DEFAULT_PAD_TOKEN,
                    added,
                    "Tokenizer has no pad token, registered one"
                );
                num_added_tokens += added;
                DEFAULT_PAD_TOKEN.to_string()
            }
        };

        let eos_token = if setup.llama_special_tokens {
            let specials: Vec<AddedToken> = [DEFAULT_EOS_TOKEN, DEFAULT_BOS_TOKEN, DEFAULT_UNK_TOKEN]
                .iter()
                .map(|t| AddedToken::from(*t, true))
                .collect();
            num_added_tokens += inner.add_special_tokens(&specials);
            DEFAULT_EOS_TOKEN.to_string()
        } else {
            declared
                .eos
                .or_else(|| find_eos_token(&inner))
                .ok_or_else(|| {
                    VigogneError::Tokenizer("Tokenizer has no end-of-sequence token".into())
                })?
        };

        let pad_token_id = inner.token_to_id(&pad_token).ok_or_else(|| {
            VigogneError::Tokenizer(format!("Pad token '{pad_token}' is not in the vocabulary"))
        })?;

        Ok(Self {
            inner,
            eos_token,
            pad_token,
            pad_token_id,
            num_added_tokens,
        })
    }

    /// Number of tokens added to the vocabulary during setup.
    ///
    /// When non-zero the model's embeddings must be resized to
    /// [`vocab_size`](TextTokenizer::vocab_size).
    pub fn num_added_tokens(&self) -> usize {
        self.num_added_tokens
    }

    /// The pad token string.
    pub fn pad_token(&self) -> &str {
        &self.pad_token
    }

    /// Get the underlying tokenizer.
    pub fn inner(&self) -> &tokenizers::Tokenizer {
        &self.inner
    }
}

impl TextTokenizer for Tokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, true)
            .map_err(|e| VigogneError::Tokenizer(e.to_string()))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        self.inner
            .decode(ids, false)
            .map_err(|e| VigogneError::Tokenizer(e.to_string()))
    }

    fn eos_token(&self) -> &str {
        &self.eos_token
    }

    fn pad_token_id(&self) -> u32 {
        self.pad_token_id
    }

    fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }

    fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        match self.inner.to_string(false) {
            Ok(json) => hasher.update(json.as_bytes()),
            // Fall back to the vocabulary when the pipeline cannot be serialized.
            Err(_) => {
                let mut vocab: Vec<_> = self.inner.get_vocab(true).into_iter().collect();
                vocab.sort_unstable_by_key(|(_, id)| *id);
                for (token, id) in vocab {
                    hasher.update(token.as_bytes());
                    hasher.update(id.to_le_bytes());
                }
            }
        }
        hasher.update(self.eos_token.as_bytes());
        hasher.update(self.pad_token_id.to_le_bytes());
        format!("{:x}", hasher.finalize())
    }
}

fn find_pad_token(inner: &tokenizers::Tokenizer) -> Option<String> {
    if let Some(padding) = inner.get_padding() {
        if inner.token_to_id(&padding.pad_token).is_some() {
            return Some(padding.pad_token.clone());
        }
    }
    ["<pad>", DEFAULT_PAD_TOKEN, "<|pad|>", "<|finetune_right_pad_id|>"]
        .into_iter()
        .find(|t| inner.token_to_id(t).is_some())
        .map(str::to_string)
}

fn find_eos_token(inner: &tokenizers::Tokenizer) -> Option<String> {
    ["</s>", "<|endoftext|>", "<|end_of_text|>", "<eos>"]
        .into_iter()
        .find(|t| inner.token_to_id(t).is_some())
        .map(str::to_string)
}

/// Special tokens declared in `tokenizer_config.json`.
#[derive(Debug, Default)]
struct DeclaredTokens {
    eos: Option<String>,
    pad: Option<String>,
}

impl DeclaredTokens {
    fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: serde_json::Value = serde_json::from_str(&content)?;
        Ok(Self {
            eos: special_token(&config, "eos_token"),
            pad: special_token(&config, "pad_token"),
        })
    }
}

/// Tokens are either a plain string or an `AddedToken` object with `content`.
fn special_token(config: &serde_json::Value, key: &str) -> Option<String> {
    let value = config.get(key)?;
    value
        .as_str()
        .or_else(|| value.get("content").and_then(|c| c.as_str()))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Deterministic whitespace tokenizer for tests and dry runs.
///
/// Words map to stable hashed IDs. The EOS marker is split out of the word it
/// is glued to, so `"Bonjour</s>"` encodes as two tokens. ID 0 is padding and
/// ID 1 is the EOS marker.
#[derive(Debug, Clone)]
pub struct WhitespaceTokenizer {
    eos_token: String,
    vocab_size: usize,
}

impl Default for WhitespaceTokenizer {
    fn default() -> Self {
        Self::new(DEFAULT_EOS_TOKEN)
    }
}

impl WhitespaceTokenizer {
    /// Padding ID.
    pub const PAD_ID: u32 = 0;
    /// EOS ID.
    pub const EOS_ID: u32 = 1;

    /// Create a tokenizer with the given EOS marker.
    pub fn new(eos_token: impl Into<String>) -> Self {
        Self {
            eos_token: eos_token.into(),
            vocab_size: 32_000,
        }
    }

    /// ID assigned to a word.
    pub fn word_id(&self, word: &str) -> u32 {
        if word == self.eos_token {
            return Self::EOS_ID;
        }
        // FNV-1a, folded into the non-reserved ID range.
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in word.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        2 + (hash % (self.vocab_size as u64 - 2)) as u32
    }

    fn words<'a>(&'a self, text: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        text.split_whitespace().flat_map(move |word| {
            if self.eos_token.is_empty() {
                return vec![word];
            }
            let mut parts = Vec::new();
            let mut rest = word;
            while let Some(pos) = rest.find(self.eos_token.as_str()) {
                if pos > 0 {
                    parts.push(&rest[..pos]);
                }
                parts.push(&rest[pos..pos + self.eos_token.len()]);
                rest = &rest[pos + self.eos_token.len()..];
            }
            if !rest.is_empty() {
                parts.push(rest);
            }
            parts
        })
    }
}

impl TextTokenizer for WhitespaceTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        Ok(self.words(text).map(|w| self.word_id(w)).collect())
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        Ok(ids
            .iter()
            .map(|id| match *id {
                Self::PAD_ID => "<pad>".to_string(),
                Self::EOS_ID => self.eos_token.clone(),
                other => format!("<{other}>"),
            })
            .collect::<Vec<_>>()
            .join(" "))
    }

    fn eos_token(&self) -> &str {
        &self.eos_token
    }

    fn pad_token_id(&self) -> u32 {
        Self::PAD_ID
    }

    fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    fn fingerprint(&self) -> String {
        format!("whitespace:{}:{}", self.eos_token, self.vocab_size)
    }
}
