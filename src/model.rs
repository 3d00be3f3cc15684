//! The RNN model blob: layer shapes, weights, and a small binary format for
//! loading caller-supplied models.
//!
//! The core denoising pipeline treats this as an opaque handle; only
//! [`crate::rnn`] interprets its contents.

use std::convert::TryInto;
use std::fmt;

/// The activation function applied after a dense layer's affine transform.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Activation {
    /// `tanh(x)`
    Tanh,
    /// `1 / (1 + exp(-x))`
    Sigmoid,
    /// `max(0, x)`
    Relu,
}

impl Activation {
    fn from_tag(tag: u8) -> Result<Activation, ModelError> {
        match tag {
            0 => Ok(Activation::Tanh),
            1 => Ok(Activation::Sigmoid),
            2 => Ok(Activation::Relu),
            other => Err(ModelError::UnknownActivation(other)),
        }
    }

    pub(crate) fn apply(self, x: f32) -> f32 {
        match self {
            Activation::Tanh => x.tanh(),
            Activation::Sigmoid => 0.5 + 0.5 * (0.5 * x).tanh(),
            Activation::Relu => x.max(0.0),
        }
    }
}

/// A fully-connected (dense) layer: `y = activation(W*x + b)`.
#[derive(Clone, Debug)]
pub struct DenseLayer {
    pub(crate) input_size: usize,
    pub(crate) output_size: usize,
    /// Row-major, `output_size * input_size` entries.
    pub(crate) weights: Vec<f32>,
    pub(crate) bias: Vec<f32>,
    pub(crate) activation: Activation,
}

impl DenseLayer {
    fn new(input_size: usize, output_size: usize, activation: Activation) -> DenseLayer {
        DenseLayer {
            input_size,
            output_size,
            weights: vec![0.0; input_size * output_size],
            bias: vec![0.0; output_size],
            activation,
        }
    }
}

/// A GRU (gated recurrent unit) layer.
///
/// Each gate (`update`, `reset`, `hidden`) is split into an
/// input-contribution matrix (`input_size` columns) and a
/// hidden-state-contribution matrix (`output_size` columns); both are stored
/// row-major with `output_size` rows.
#[derive(Clone, Debug)]
pub struct GruLayer {
    pub(crate) input_size: usize,
    pub(crate) output_size: usize,
    pub(crate) update_input: Vec<f32>,
    pub(crate) update_hidden: Vec<f32>,
    pub(crate) reset_input: Vec<f32>,
    pub(crate) reset_hidden: Vec<f32>,
    pub(crate) candidate_input: Vec<f32>,
    pub(crate) candidate_hidden: Vec<f32>,
    pub(crate) bias_update: Vec<f32>,
    pub(crate) bias_reset: Vec<f32>,
    pub(crate) bias_candidate: Vec<f32>,
    pub(crate) activation: Activation,
}

impl GruLayer {
    fn new(input_size: usize, output_size: usize, activation: Activation) -> GruLayer {
        GruLayer {
            input_size,
            output_size,
            update_input: vec![0.0; input_size * output_size],
            update_hidden: vec![0.0; output_size * output_size],
            reset_input: vec![0.0; input_size * output_size],
            reset_hidden: vec![0.0; output_size * output_size],
            candidate_input: vec![0.0; input_size * output_size],
            candidate_hidden: vec![0.0; output_size * output_size],
            bias_update: vec![0.0; output_size],
            bias_reset: vec![0.0; output_size],
            bias_candidate: vec![0.0; output_size],
            activation,
        }
    }
}

/// The complete set of weights for the three-GRU denoising network:
/// an input dense layer, a VAD-output head, and the `{vad, noise, denoise}`
/// GRU stack feeding the per-band gain output.
#[derive(Clone, Debug)]
pub struct RnnModel {
    pub(crate) input_dense: DenseLayer,
    pub(crate) vad_gru: GruLayer,
    pub(crate) noise_gru: GruLayer,
    pub(crate) denoise_gru: GruLayer,
    pub(crate) denoise_output: DenseLayer,
    pub(crate) vad_output: DenseLayer,
}

impl RnnModel {
    /// The size of the VAD GRU's hidden state.
    pub fn vad_gru_size(&self) -> usize {
        self.vad_gru.output_size
    }
    /// The size of the noise-estimation GRU's hidden state.
    pub fn noise_gru_size(&self) -> usize {
        self.noise_gru.output_size
    }
    /// The size of the denoising GRU's hidden state.
    pub fn denoise_gru_size(&self) -> usize {
        self.denoise_gru.output_size
    }

    /// The embedded default model, used when [`crate::DenoiseState`] is
    /// constructed without a caller-supplied model.
    pub fn builtin() -> &'static RnnModel {
        &crate::model_data::BUILTIN
    }

    /// Parses a model from its binary representation (see [`RnnModel::to_bytes`]
    /// for the layout, which is only used by tests here; a real deployment
    /// would ship model files produced by the training harness).
    pub fn from_bytes(bytes: &[u8]) -> Result<RnnModel, ModelError> {
        let mut r = Reader::new(bytes);
        let magic = r.read_u32()?;
        if magic != MAGIC {
            return Err(ModelError::BadMagic);
        }

        let input_size = r.read_u32()? as usize;
        if input_size != crate::NB_FEATURES {
            return Err(ModelError::BadLayerShape {
                layer: 0,
                expected: crate::NB_FEATURES,
                got: input_size,
            });
        }
        let dense_hidden = r.read_u32()? as usize;
        let mut input_dense = DenseLayer::new(input_size, dense_hidden, Activation::Tanh);
        r.read_dense(&mut input_dense)?;

        let vad_size = r.read_u32()? as usize;
        let mut vad_gru = GruLayer::new(dense_hidden, vad_size, Activation::Tanh);
        r.read_gru(&mut vad_gru)?;

        let noise_size = r.read_u32()? as usize;
        let mut noise_gru = GruLayer::new(dense_hidden + vad_size, noise_size, Activation::Tanh);
        r.read_gru(&mut noise_gru)?;

        let denoise_size = r.read_u32()? as usize;
        let mut denoise_gru = GruLayer::new(
            dense_hidden + vad_size + noise_size,
            denoise_size,
            Activation::Tanh,
        );
        r.read_gru(&mut denoise_gru)?;

        let nb_bands = r.read_u32()? as usize;
        if nb_bands != crate::NB_BANDS {
            return Err(ModelError::BadLayerShape {
                layer: 4,
                expected: crate::NB_BANDS,
                got: nb_bands,
            });
        }
        let mut denoise_output = DenseLayer::new(denoise_size, nb_bands, Activation::Sigmoid);
        r.read_dense(&mut denoise_output)?;

        let mut vad_output = DenseLayer::new(vad_size, 1, Activation::Sigmoid);
        r.read_dense(&mut vad_output)?;

        Ok(RnnModel {
            input_dense,
            vad_gru,
            noise_gru,
            denoise_gru,
            denoise_output,
            vad_output,
        })
    }

    #[cfg(test)]
    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_u32(MAGIC);
        w.write_u32(self.input_dense.input_size as u32);
        w.write_u32(self.input_dense.output_size as u32);
        w.write_dense(&self.input_dense);
        w.write_u32(self.vad_gru.output_size as u32);
        w.write_gru(&self.vad_gru);
        w.write_u32(self.noise_gru.output_size as u32);
        w.write_gru(&self.noise_gru);
        w.write_u32(self.denoise_gru.output_size as u32);
        w.write_gru(&self.denoise_gru);
        w.write_u32(self.denoise_output.output_size as u32);
        w.write_dense(&self.denoise_output);
        w.write_dense(&self.vad_output);
        w.bytes
    }
}

const MAGIC: u32 = 0x524e_4e31; // "RNN1"

/// An error encountered while parsing a caller-supplied model. Construction
/// of a [`crate::DenoiseState`] is the only place this can surface; once
/// built, frame processing is infallible (see the crate's error-handling
/// notes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// The file did not start with the expected magic number.
    BadMagic,
    /// The file ended before all expected data was read.
    UnexpectedEof,
    /// An activation tag outside `{0, 1, 2}`.
    UnknownActivation(u8),
    /// A layer's declared size doesn't match the crate's fixed constants
    /// (e.g. the input dense layer's input size isn't `NB_FEATURES`, or the
    /// gain output isn't `NB_BANDS` wide).
    BadLayerShape {
        /// The index (in read order) of the layer that failed the check.
        layer: usize,
        /// The size this crate requires.
        expected: usize,
        /// The size actually found in the file.
        got: usize,
    },
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::BadMagic => write!(f, "model file has an unrecognized header"),
            ModelError::UnexpectedEof => write!(f, "model file ended unexpectedly"),
            ModelError::UnknownActivation(tag) => write!(f, "unknown activation tag {}", tag),
            ModelError::BadLayerShape {
                layer,
                expected,
                got,
            } => write!(
                f,
                "layer #{} has the wrong shape: expected {}, got {}",
                layer, expected, got
            ),
        }
    }
}

impl std::error::Error for ModelError {}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
    layer: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Reader<'a> {
        Reader {
            bytes,
            pos: 0,
            layer: 0,
        }
    }

    fn read_u32(&mut self) -> Result<u32, ModelError> {
        let end = self.pos + 4;
        let chunk = self
            .bytes
            .get(self.pos..end)
            .ok_or(ModelError::UnexpectedEof)?;
        self.pos = end;
        Ok(u32::from_le_bytes(chunk.try_into().unwrap()))
    }

    fn read_f32_slice(&mut self, out: &mut [f32]) -> Result<(), ModelError> {
        for v in out.iter_mut() {
            let end = self.pos + 4;
            let chunk = self
                .bytes
                .get(self.pos..end)
                .ok_or(ModelError::UnexpectedEof)?;
            self.pos = end;
            *v = f32::from_le_bytes(chunk.try_into().unwrap());
        }
        Ok(())
    }

    fn read_dense(&mut self, layer: &mut DenseLayer) -> Result<(), ModelError> {
        self.layer += 1;
        let tag = self.bytes.get(self.pos).copied().ok_or(ModelError::UnexpectedEof)?;
        self.pos += 1;
        layer.activation = Activation::from_tag(tag)?;
        self.read_f32_slice(&mut layer.weights)?;
        self.read_f32_slice(&mut layer.bias)
    }

    fn read_gru(&mut self, layer: &mut GruLayer) -> Result<(), ModelError> {
        self.layer += 1;
        let tag = self.bytes.get(self.pos).copied().ok_or(ModelError::UnexpectedEof)?;
        self.pos += 1;
        layer.activation = Activation::from_tag(tag)?;
        self.read_f32_slice(&mut layer.update_input)?;
        self.read_f32_slice(&mut layer.update_hidden)?;
        self.read_f32_slice(&mut layer.reset_input)?;
        self.read_f32_slice(&mut layer.reset_hidden)?;
        self.read_f32_slice(&mut layer.candidate_input)?;
        self.read_f32_slice(&mut layer.candidate_hidden)?;
        self.read_f32_slice(&mut layer.bias_update)?;
        self.read_f32_slice(&mut layer.bias_reset)?;
        self.read_f32_slice(&mut layer.bias_candidate)
    }
}

#[cfg(test)]
struct Writer {
    bytes: Vec<u8>,
}

#[cfg(test)]
impl Writer {
    fn new() -> Writer {
        Writer { bytes: Vec::new() }
    }
    fn write_u32(&mut self, v: u32) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }
    fn write_f32_slice(&mut self, v: &[f32]) {
        for x in v {
            self.bytes.extend_from_slice(&x.to_le_bytes());
        }
    }
    fn write_dense(&mut self, layer: &DenseLayer) {
        self.bytes.push(match layer.activation {
            Activation::Tanh => 0,
            Activation::Sigmoid => 1,
            Activation::Relu => 2,
        });
        self.write_f32_slice(&layer.weights);
        self.write_f32_slice(&layer.bias);
    }
    fn write_gru(&mut self, layer: &GruLayer) {
        self.bytes.push(match layer.activation {
            Activation::Tanh => 0,
            Activation::Sigmoid => 1,
            Activation::Relu => 2,
        });
        self.write_f32_slice(&layer.update_input);
        self.write_f32_slice(&layer.update_hidden);
        self.write_f32_slice(&layer.reset_input);
        self.write_f32_slice(&layer.reset_hidden);
        self.write_f32_slice(&layer.candidate_input);
        self.write_f32_slice(&layer.candidate_hidden);
        self.write_f32_slice(&layer.bias_update);
        self.write_f32_slice(&layer.bias_reset);
        self.write_f32_slice(&layer.bias_candidate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_loads() {
        let m = RnnModel::builtin();
        assert_eq!(m.vad_gru_size(), crate::model_data::VAD_GRU_SIZE);
        assert_eq!(m.noise_gru_size(), crate::model_data::NOISE_GRU_SIZE);
        assert_eq!(m.denoise_gru_size(), crate::model_data::DENOISE_GRU_SIZE);
    }

    #[test]
    fn round_trips_through_bytes() {
        let original = RnnModel::builtin().clone();
        let bytes = original.to_bytes();
        let parsed = RnnModel::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.vad_gru_size(), original.vad_gru_size());
        assert_eq!(parsed.input_dense.weights, original.input_dense.weights);
    }

    #[test]
    fn rejects_bad_magic() {
        let bytes = [0u8; 16];
        assert_eq!(RnnModel::from_bytes(&bytes), Err(ModelError::BadMagic));
    }

    #[test]
    fn rejects_truncated_file() {
        let bytes = MAGIC.to_le_bytes();
        assert_eq!(
            RnnModel::from_bytes(&bytes),
            Err(ModelError::UnexpectedEof)
        );
    }

    #[test]
    fn rejects_mismatched_input_size() {
        let mut w = Writer::new();
        w.write_u32(MAGIC);
        w.write_u32(crate::NB_FEATURES as u32 + 1);
        let bytes = w.bytes;
        assert_eq!(
            RnnModel::from_bytes(&bytes),
            Err(ModelError::BadLayerShape {
                layer: 0,
                expected: crate::NB_FEATURES,
                got: crate::NB_FEATURES + 1,
            })
        );
    }

    #[test]
    fn rejects_mismatched_band_count() {
        let original = RnnModel::builtin().clone();
        let mut w = Writer::new();
        w.write_u32(MAGIC);
        w.write_u32(original.input_dense.input_size as u32);
        w.write_u32(original.input_dense.output_size as u32);
        w.write_dense(&original.input_dense);
        w.write_u32(original.vad_gru.output_size as u32);
        w.write_gru(&original.vad_gru);
        w.write_u32(original.noise_gru.output_size as u32);
        w.write_gru(&original.noise_gru);
        w.write_u32(original.denoise_gru.output_size as u32);
        w.write_gru(&original.denoise_gru);
        w.write_u32(original.denoise_output.output_size as u32 + 1);
        let bytes = w.bytes;
        assert_eq!(
            RnnModel::from_bytes(&bytes),
            Err(ModelError::BadLayerShape {
                layer: 4,
                expected: crate::NB_BANDS,
                got: crate::NB_BANDS + 1,
            })
        );
    }
}
