//! Static catalog of pullable models.
//!
//! The catalog maps human names to download URLs plus the metadata we
//! record after a pull. Pulling a name the catalog does not know fails
//! with a listing of known names, unless a test-override base URL is
//! configured; then a minimal entry is synthesised for any name.

use tutu_types::ModelRef;

/// One pullable model the daemon knows about.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    /// Catalog key: either a bare name (`llama3`) or `name:tag`.
    pub name: String,
    /// Direct download URL for the weights file.
    pub url: String,
    /// Approximate size in bytes, used for progress when the origin sends
    /// no content length. Zero disables that fallback.
    pub size: u64,
    /// Weights format recorded in metadata.
    pub format: String,
    /// Model family recorded in metadata.
    pub family: String,
    /// Parameter-count label recorded in metadata.
    pub parameter_size: String,
    /// Quantization label recorded in metadata.
    pub quantization: String,
}

/// The set of models `pull` accepts.
#[derive(Debug, Clone)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
    override_url: Option<String>,
}

impl Catalog {
    /// The built-in starter catalog: small GGUF builds with permissive
    /// licenses, all CPU-friendly.
    pub fn builtin() -> Self {
        let gguf = |name: &str, url: &str, size: u64, family: &str, params: &str, quant: &str| {
            CatalogEntry {
                name: name.to_string(),
                url: url.to_string(),
                size,
                format: "gguf".to_string(),
                family: family.to_string(),
                parameter_size: params.to_string(),
                quantization: quant.to_string(),
            }
        };
        Self {
            entries: vec![
                gguf(
                    "llama3",
                    "https://huggingface.co/bartowski/Llama-3.2-3B-Instruct-GGUF/resolve/main/Llama-3.2-3B-Instruct-Q4_K_M.gguf",
                    2_020_000_000,
                    "llama",
                    "3B",
                    "Q4_K_M",
                ),
                gguf(
                    "llama3:8b",
                    "https://huggingface.co/bartowski/Meta-Llama-3.1-8B-Instruct-GGUF/resolve/main/Meta-Llama-3.1-8B-Instruct-Q4_K_M.gguf",
                    4_920_000_000,
                    "llama",
                    "8B",
                    "Q4_K_M",
                ),
                gguf(
                    "phi3",
                    "https://huggingface.co/microsoft/Phi-3-mini-4k-instruct-gguf/resolve/main/Phi-3-mini-4k-instruct-q4.gguf",
                    2_390_000_000,
                    "phi",
                    "3.8B",
                    "Q4",
                ),
                gguf(
                    "tinyllama",
                    "https://huggingface.co/TheBloke/TinyLlama-1.1B-Chat-v1.0-GGUF/resolve/main/tinyllama-1.1b-chat-v1.0.Q4_K_M.gguf",
                    669_000_000,
                    "llama",
                    "1.1B",
                    "Q4_K_M",
                ),
            ],
            override_url: None,
        }
    }

    /// An empty catalog (useful with an override URL in tests).
    pub fn empty() -> Self {
        Self {
            entries: vec![],
            override_url: None,
        }
    }

    /// Set a base URL that synthesises an entry for any name. Test hook.
    #[must_use]
    pub fn with_override_url(mut self, url: impl Into<String>) -> Self {
        self.override_url = Some(url.into());
        self
    }

    /// Look up a reference: first by canonical `name:tag`, then by bare
    /// name. Falls back to a synthesised entry when an override URL is set.
    pub fn lookup(&self, reference: &ModelRef) -> Option<CatalogEntry> {
        let canonical = reference.canonical();
        if let Some(entry) = self
            .entries
            .iter()
            .find(|e| e.name == canonical || e.name == reference.name)
        {
            return Some(entry.clone());
        }
        self.override_url.as_ref().map(|base| CatalogEntry {
            name: reference.canonical(),
            url: format!("{}/{}", base.trim_end_matches('/'), reference.name),
            size: 0,
            format: "gguf".to_string(),
            family: reference.name.clone(),
            parameter_size: String::new(),
            quantization: String::new(),
        })
    }

    /// Comma-separated catalogued names, for error messages.
    pub fn known_names(&self) -> String {
        self.entries
            .iter()
            .map(|e| e.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}
