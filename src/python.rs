//! Python bindings, built with `--features python`.

use pyo3::{
    exceptions::{PyUnicodeDecodeError, PyValueError},
    prelude::*,
};

use crate::{
    config::TrainerConfig, error::ErrorMode, tokenizer::BPETokenizer, trainer::train, types::Token,
};

fn value_error(e: impl std::fmt::Display) -> PyErr {
    PyValueError::new_err(e.to_string())
}

/// Builds a `UnicodeDecodeError` carrying the whole decoded buffer and the
/// span of the first invalid sequence.
fn unicode_decode_error(py: Python<'_>, bytes: &[u8], err: std::str::Utf8Error) -> PyErr {
    match PyUnicodeDecodeError::new_utf8(py, bytes, err) {
        Ok(exc) => PyErr::from_value(exc.into_any()),
        Err(e) => e,
    }
}

/// Python wrapper for a trained tokenizer.
#[pyclass(name = "Tokenizer", module = "bytebpe", frozen)]
pub struct PyTokenizer {
    inner: BPETokenizer,
}

#[pymethods]
impl PyTokenizer {
    /// Encode a string to token ids. Special tokens are honoured.
    fn encode(&self, py: Python<'_>, text: &str) -> PyResult<Vec<Token>> {
        py.allow_threads(|| self.inner.encode_text(text)).map_err(value_error)
    }

    /// Encode raw bytes to token ids.
    fn encode_bytes(&self, py: Python<'_>, data: &[u8]) -> PyResult<Vec<Token>> {
        py.allow_threads(|| self.inner.encode(data)).map_err(value_error)
    }

    /// Encode many strings in parallel.
    #[pyo3(signature = (texts, show_progress=false))]
    fn encode_batch(&self, py: Python<'_>, texts: Vec<String>, show_progress: bool) -> PyResult<Vec<Vec<Token>>> {
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        py.allow_threads(|| self.inner.encode_batch(&refs, show_progress))
            .map_err(value_error)
    }

    /// Decode token ids to a string. `errors` is "strict" or "replace".
    ///
    /// Raises `UnicodeDecodeError` in strict mode if the bytes are not
    /// valid UTF-8, and `ValueError` for unknown ids.
    #[pyo3(signature = (ids, errors="strict"))]
    fn decode(&self, py: Python<'_>, ids: Vec<Token>, errors: &str) -> PyResult<String> {
        let mode: ErrorMode = errors.parse().map_err(PyValueError::new_err)?;
        let bytes = self.inner.decode(&ids).map_err(value_error)?;
        match mode {
            ErrorMode::Strict => match std::str::from_utf8(&bytes) {
                Ok(text) => Ok(text.to_owned()),
                Err(e) => Err(unicode_decode_error(py, &bytes, e)),
            },
            ErrorMode::Replace => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        }
    }

    /// Decode token ids to raw bytes.
    fn decode_bytes(&self, ids: Vec<Token>) -> PyResult<Vec<u8>> {
        self.inner.decode(&ids).map_err(value_error)
    }

    /// Merge rules in discovery order as `((left, right), merged)`.
    fn merges(&self) -> Vec<((Token, Token), Token)> {
        self.inner
            .merges()
            .iter()
            .map(|r| ((r.pair.0, r.pair.1), r.merged))
            .collect()
    }

    /// Bytes of every vocabulary entry, indexed by id.
    fn vocab(&self) -> Vec<Vec<u8>> {
        self.inner.vocabulary().as_slice().to_vec()
    }

    #[getter]
    fn vocab_size(&self) -> usize {
        self.inner.vocab_size()
    }

    fn __len__(&self) -> usize {
        self.inner.vocab_size()
    }
}

/// Train a tokenizer on an in-memory corpus.
#[pyfunction]
#[pyo3(signature = (corpus, vocab_size, special_tokens=None, num_chunks=None, min_frequency=2, show_progress=false))]
fn train_bpe(
    py: Python<'_>,
    corpus: &[u8],
    vocab_size: usize,
    special_tokens: Option<Vec<String>>,
    num_chunks: Option<usize>,
    min_frequency: u64,
    show_progress: bool,
) -> PyResult<PyTokenizer> {
    let defaults = TrainerConfig::default();
    let config = TrainerConfig {
        vocab_size,
        special_tokens: special_tokens.unwrap_or(defaults.special_tokens),
        num_chunks: num_chunks.unwrap_or(defaults.num_chunks),
        min_frequency,
        show_progress,
        ..TrainerConfig::with_vocab_size(vocab_size)
    };

    let output = py
        .allow_threads(|| train(corpus, &config))
        .map_err(value_error)?;
    let inner = BPETokenizer::try_from(output).map_err(value_error)?;
    Ok(PyTokenizer { inner })
}

#[pymodule]
fn bytebpe(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyTokenizer>()?;
    m.add_function(wrap_pyfunction!(train_bpe, m)?)?;
    Ok(())
}
