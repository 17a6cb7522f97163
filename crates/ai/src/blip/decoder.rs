use super::CaptionModel;
use crate::{VisionError, VisionResult};
use ndarray::{s, Array2, Array3, ArrayView4};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeParams {
    pub min_new_tokens: usize,
    pub max_new_tokens: usize,
}

impl Default for DecodeParams {
    fn default() -> Self {
        Self {
            min_new_tokens: 10,
            max_new_tokens: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndOfSequence,
    MaxNewTokens,
}

/// Token ids produced by one decode call, beginning-of-sequence id included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSequence {
    pub ids: Vec<u32>,
    pub stop: StopReason,
}

impl TokenSequence {
    pub fn new_tokens(&self) -> usize {
        self.ids.len().saturating_sub(1)
    }
}

/// Greedy autoregressive decoder.
///
/// Every step runs the full graph over the image and the whole sequence so far,
/// appends the arg-max of the last position, and stops on an end-of-sequence
/// id produced after at least `min_new_tokens` completed steps (so at token
/// `min_new_tokens + 1` or later), or after `max_new_tokens` steps. An
/// end-of-sequence id produced earlier is kept and decoding continues.
#[derive(Debug, Clone, Default)]
pub struct CaptionDecoder {
    params: DecodeParams,
}

impl CaptionDecoder {
    pub fn new(params: DecodeParams) -> Self {
        let params = if params.min_new_tokens > params.max_new_tokens {
            DecodeParams {
                min_new_tokens: params.max_new_tokens,
                ..params
            }
        } else {
            params
        };
        Self { params }
    }

    pub fn params(&self) -> &DecodeParams {
        &self.params
    }

    pub fn generate(
        &self,
        model: &CaptionModel,
        pixel_values: ArrayView4<f32>,
    ) -> VisionResult<TokenSequence> {
        let DecodeParams {
            min_new_tokens,
            max_new_tokens,
        } = self.params;
        let eos = model.special_tokens().eos;
        let mut ids = vec![model.special_tokens().bos];

        for step in 0..max_new_tokens {
            let start = Instant::now();
            let input_ids = Array2::from_shape_vec(
                (1, ids.len()),
                ids.iter().map(|&id| id as i64).collect(),
            )
            .map_err(VisionError::inference)?;

            let logits = model.graph().forward(pixel_values.view(), input_ids.view())?;
            let next = argmax_last_position(&logits)?;
            ids.push(next);
            trace!("step {} infer: {:?}, token {}", step + 1, start.elapsed(), next);

            if eos == Some(next) && step >= min_new_tokens {
                return Ok(TokenSequence {
                    ids,
                    stop: StopReason::EndOfSequence,
                });
            }
        }

        Ok(TokenSequence {
            ids,
            stop: StopReason::MaxNewTokens,
        })
    }

    pub fn decode(
        &self,
        model: &CaptionModel,
        pixel_values: ArrayView4<f32>,
    ) -> VisionResult<String> {
        let sequence = self.generate(model, pixel_values)?;
        debug!(
            "generated {} tokens, stopped by {:?}",
            sequence.new_tokens(),
            sequence.stop
        );

        let caption = model.tokenizer().decode_ids(&sequence.ids)?;
        Ok(caption.trim().to_string())
    }
}

/// First index of the maximum logit at the last sequence position of batch 0.
fn argmax_last_position(logits: &Array3<f32>) -> VisionResult<u32> {
    let (batch, seq_len, vocab) = logits.dim();
    if batch == 0 || seq_len == 0 || vocab == 0 {
        return Err(VisionError::Inference(format!(
            "unexpected logits shape {:?}",
            logits.shape()
        )));
    }

    let last = logits.slice(s![0, seq_len - 1, ..]);
    let mut best: Option<(usize, f32)> = None;
    for (index, &value) in last.iter().enumerate() {
        if value.is_nan() {
            continue;
        }
        match best {
            Some((_, top)) if value <= top => {}
            _ => best = Some((index, value)),
        }
    }

    best.map(|(index, _)| index as u32)
        .ok_or_else(|| VisionError::Inference("all logits are NaN".into()))
}
