use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::activation::ActivationFunction;
use crate::error::{CosalError, Result};
use crate::layers::Layer;
use crate::math::Tensor;
use crate::network::parameter::{ParamGroup, Parameter};
use crate::network::runner::{ModelOutputs, ModelRunner, OutputGrads};
use crate::network::spec::ModelConfig;

/// Pooling factors of the coarse deep-supervision maps, coarse first.
const POOL_FACTORS: [usize; 3] = [8, 4, 2];

const EPS: f64 = 1e-8;

/// Compact group co-saliency network.
///
/// Every pixel runs through a two-layer backbone (`bb.conv1`, `bb.conv5`).
/// The mean backbone feature over the whole group acts as the consensus
/// vector; the decoder sees each pixel's feature both raw and gated by that
/// consensus, so pixels sharing the group's dominant appearance light up.
/// Gradients are exact, including through the consensus and the class-mask
/// weights.
pub struct CoSalNet {
    config: ModelConfig,
    conv1: Layer,
    conv5: Layer,
    decoder: Layer,
    cls: Option<Layer>,
    contrast: Option<Layer>,
    cls_mask: Option<Layer>,
    training: bool,
    cache: Option<ForwardCache>,
}

struct ForwardCache {
    images: Tensor,
    n: usize,
    h: usize,
    w: usize,
    a1: Vec<f64>,
    h1: Vec<f64>,
    a2: Vec<f64>,
    feat: Vec<f64>,
    consensus: Vec<f64>,
    logits: Vec<f64>,
    half_size: (usize, usize),
    image_means: Vec<f64>,
    cls_logits: Vec<f64>,
    contrast_logits: Vec<f64>,
    masks: Vec<Vec<f64>>,
    mask_sums: Vec<Vec<f64>>,
    masked_means: Vec<Vec<f64>>,
    cls_mask_logits: Vec<Vec<f64>>,
}

impl CoSalNet {
    pub fn new(config: ModelConfig) -> CoSalNet {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let k = config.hidden;
        let classes = config.num_classes;
        let relu = ActivationFunction::ReLU;
        let identity = ActivationFunction::Identity;

        let conv1 = Layer::new("bb.conv1", ParamGroup::Backbone, config.in_channels, k, relu, &mut rng);
        let conv5 = Layer::new("bb.conv5", ParamGroup::Backbone, k, k, relu, &mut rng);
        let decoder = Layer::new("dec.pred", ParamGroup::Base, 2 * k, 1, identity, &mut rng);
        let cls = config
            .heads
            .cls
            .then(|| Layer::new("cls.fc", ParamGroup::Base, k, classes, identity, &mut rng));
        let contrast = config
            .heads
            .contrast
            .then(|| Layer::new("contrast.pred", ParamGroup::Base, k, 1, identity, &mut rng));
        let cls_mask = config
            .heads
            .cls_mask
            .then(|| Layer::new("cls_mask.fc", ParamGroup::Base, k, classes, identity, &mut rng));

        CoSalNet {
            config,
            conv1,
            conv5,
            decoder,
            cls,
            contrast,
            cls_mask,
            training: true,
            cache: None,
        }
    }

    fn run(&self, images: &Tensor) -> Result<(ModelOutputs, ForwardCache)> {
        let (n, c, h, w) = images.dims4()?;
        if c != self.config.in_channels || n == 0 || h == 0 || w == 0 {
            return Err(CosalError::Shape(format!(
                "expected [N>0, {}, H>0, W>0] images, got {:?}",
                self.config.in_channels, images.shape
            )));
        }
        let k = self.config.hidden;
        let hw = h * w;
        let pixels = n * hw;

        let mut a1 = vec![0.0; pixels * k];
        let mut h1 = vec![0.0; pixels * k];
        let mut a2 = vec![0.0; pixels * k];
        let mut feat = vec![0.0; pixels * k];
        let mut x = vec![0.0; c];
        for p in 0..pixels {
            gather_pixel(images, p, hw, &mut x);
            let span = p * k..(p + 1) * k;
            self.conv1.feed_from(&x, &mut a1[span.clone()], &mut h1[span.clone()]);
            self.conv5.feed_from(&h1[span.clone()], &mut a2[span.clone()], &mut feat[span]);
        }

        let mut consensus = vec![0.0; k];
        for p in 0..pixels {
            for j in 0..k {
                consensus[j] += feat[p * k + j];
            }
        }
        consensus.iter_mut().for_each(|v| *v /= pixels as f64);

        let mut logits = vec![0.0; pixels];
        let mut u = vec![0.0; 2 * k];
        let mut out = [0.0; 1];
        for p in 0..pixels {
            decoder_input(&feat[p * k..(p + 1) * k], &consensus, &mut u);
            self.decoder.feed_from(&u, &mut out, &mut logits[p..p + 1]);
        }

        let full = Tensor::from_vec(&[n, 1, h, w], logits.clone())?;
        let mut scaled_preds = Vec::with_capacity(POOL_FACTORS.len() + 1);
        for factor in POOL_FACTORS {
            scaled_preds.push(full.adaptive_avg_pool((h / factor).max(1), (w / factor).max(1))?);
        }
        let half_size = ((h / 2).max(1), (w / 2).max(1));
        let half = scaled_preds[POOL_FACTORS.len() - 1].clone();
        scaled_preds.push(full.clone());

        let mut image_means = vec![0.0; n * k];
        for p in 0..pixels {
            let ni = p / hw;
            for j in 0..k {
                image_means[ni * k + j] += feat[p * k + j] / hw as f64;
            }
        }

        let classes = self.config.num_classes;
        let mut cls_logits = Vec::new();
        let pred_cls = match &self.cls {
            Some(layer) => {
                cls_logits = vec![0.0; n * classes];
                let mut post = vec![0.0; classes];
                for ni in 0..n {
                    layer.feed_from(
                        &image_means[ni * k..(ni + 1) * k],
                        &mut cls_logits[ni * classes..(ni + 1) * classes],
                        &mut post,
                    );
                }
                Some(Tensor::from_vec(&[n, classes], cls_logits.clone())?)
            }
            None => None,
        };

        let mut contrast_logits = Vec::new();
        let pred_contrast = match &self.contrast {
            Some(layer) => {
                contrast_logits = vec![0.0; 2 * pixels];
                let mut v = vec![0.0; k];
                let zeros = vec![0.0; k];
                let mut post = [0.0; 1];
                for p in 0..pixels {
                    gate(&feat[p * k..(p + 1) * k], &consensus, &mut v);
                    layer.feed_from(&v, &mut contrast_logits[p..p + 1], &mut post);
                    layer.feed_from(&zeros, &mut contrast_logits[pixels + p..pixels + p + 1], &mut post);
                }
                Some(Tensor::from_vec(&[2 * n, 1, h, w], contrast_logits.clone())?)
            }
            None => None,
        };

        let mut masks = Vec::new();
        let mut mask_sums = Vec::new();
        let mut masked_means = Vec::new();
        let mut cls_mask_logits = Vec::new();
        let pred_cls_masks = match &self.cls_mask {
            Some(layer) => {
                let sources = [full.sigmoid(), half.resize_bilinear(h, w)?.sigmoid()];
                let mut preds = Vec::with_capacity(sources.len());
                let mut post = vec![0.0; classes];
                for mask in sources {
                    let mut sums = vec![0.0; n];
                    let mut means = vec![0.0; n * k];
                    for p in 0..pixels {
                        let ni = p / hw;
                        sums[ni] += mask.data[p];
                        for j in 0..k {
                            means[ni * k + j] += mask.data[p] * feat[p * k + j];
                        }
                    }
                    for ni in 0..n {
                        for j in 0..k {
                            means[ni * k + j] /= sums[ni] + EPS;
                        }
                    }
                    let mut scale_logits = vec![0.0; n * classes];
                    for ni in 0..n {
                        layer.feed_from(
                            &means[ni * k..(ni + 1) * k],
                            &mut scale_logits[ni * classes..(ni + 1) * classes],
                            &mut post,
                        );
                    }
                    preds.push(Tensor::from_vec(&[n, classes], scale_logits.clone())?);
                    masks.push(mask.data);
                    mask_sums.push(sums);
                    masked_means.push(means);
                    cls_mask_logits.push(scale_logits);
                }
                Some(preds)
            }
            None => None,
        };

        let outputs = ModelOutputs {
            scaled_preds,
            pred_cls,
            pred_contrast,
            pred_cls_masks,
        };
        let cache = ForwardCache {
            images: images.clone(),
            n,
            h,
            w,
            a1,
            h1,
            a2,
            feat,
            consensus,
            logits,
            half_size,
            image_means,
            cls_logits,
            contrast_logits,
            masks,
            mask_sums,
            masked_means,
            cls_mask_logits,
        };
        Ok((outputs, cache))
    }
}

impl ModelRunner for CoSalNet {
    fn forward(&mut self, images: &Tensor) -> Result<ModelOutputs> {
        let (outputs, cache) = self.run(images)?;
        self.cache = Some(cache);
        Ok(outputs)
    }

    fn predict(&self, images: &Tensor) -> Result<ModelOutputs> {
        self.run(images).map(|(outputs, _)| outputs)
    }

    fn backward(&mut self, grads: &OutputGrads) -> Result<()> {
        let cache = self
            .cache
            .take()
            .ok_or_else(|| CosalError::Shape("backward called without a preceding forward".into()))?;
        let (n, h, w) = (cache.n, cache.h, cache.w);
        let k = self.config.hidden;
        let classes = self.config.num_classes;
        let c = self.config.in_channels;
        let hw = h * w;
        let pixels = n * hw;

        if grads.scaled_preds.len() != POOL_FACTORS.len() + 1 {
            return Err(CosalError::Shape(format!(
                "expected {} saliency gradients, got {}",
                POOL_FACTORS.len() + 1,
                grads.scaled_preds.len()
            )));
        }

        // dL/dlogit at full resolution, gathered from every scale.
        let mut dz = Tensor::zeros(&[n, 1, h, w]);
        let last = grads.scaled_preds.len() - 1;
        for (i, grad) in grads.scaled_preds.iter().enumerate() {
            if let Some(grad) = grad {
                if i == last {
                    dz.add_assign(grad)?;
                } else {
                    dz.add_assign(&grad.adaptive_avg_pool_adjoint(h, w)?)?;
                }
            }
        }

        let mut dfeat = vec![0.0; pixels * k];
        let mut dconsensus = vec![0.0; k];

        if let Some(layer) = self.cls_mask.as_mut() {
            let mut dmean = vec![0.0; k];
            for (s, grad) in grads.pred_cls_masks.iter().enumerate() {
                let Some(grad) = grad else { continue };
                check_len(grad, n * classes, "class-mask gradient")?;
                let mask = &cache.masks[s];
                let mut dmask = vec![0.0; pixels];
                for ni in 0..n {
                    dmean.iter_mut().for_each(|v| *v = 0.0);
                    let span = ni * classes..(ni + 1) * classes;
                    layer.backward(
                        &grad.data[span.clone()],
                        &cache.cls_mask_logits[s][span],
                        &cache.masked_means[s][ni * k..(ni + 1) * k],
                        &mut dmean,
                    );
                    let denom = cache.mask_sums[s][ni] + EPS;
                    let means = &cache.masked_means[s][ni * k..(ni + 1) * k];
                    for pix in 0..hw {
                        let p = ni * hw + pix;
                        let f = &cache.feat[p * k..(p + 1) * k];
                        let mut dm = 0.0;
                        for j in 0..k {
                            dfeat[p * k + j] += dmean[j] * mask[p] / denom;
                            dm += dmean[j] * (f[j] - means[j]) / denom;
                        }
                        dmask[p] = dm * mask[p] * (1.0 - mask[p]);
                    }
                }
                let dmask = Tensor::from_vec(&[n, 1, h, w], dmask)?;
                if s == 0 {
                    dz.add_assign(&dmask)?;
                } else {
                    let (hh, hw_half) = cache.half_size;
                    let dhalf = dmask.resize_bilinear_adjoint(hh, hw_half)?;
                    dz.add_assign(&dhalf.adaptive_avg_pool_adjoint(h, w)?)?;
                }
            }
        }

        let mut u = vec![0.0; 2 * k];
        let mut du = vec![0.0; 2 * k];
        for p in 0..pixels {
            if dz.data[p] == 0.0 {
                continue;
            }
            let f = &cache.feat[p * k..(p + 1) * k];
            decoder_input(f, &cache.consensus, &mut u);
            du.iter_mut().for_each(|v| *v = 0.0);
            self.decoder.backward(&dz.data[p..p + 1], &cache.logits[p..p + 1], &u, &mut du);
            for j in 0..k {
                dfeat[p * k + j] += du[j] + du[k + j] * cache.consensus[j];
                dconsensus[j] += du[k + j] * f[j];
            }
        }

        if let (Some(layer), Some(grad)) = (self.contrast.as_mut(), grads.pred_contrast.as_ref()) {
            check_len(grad, 2 * pixels, "contrast gradient")?;
            let mut v = vec![0.0; k];
            let mut dv = vec![0.0; k];
            let zeros = vec![0.0; k];
            let mut scratch = vec![0.0; k];
            for p in 0..pixels {
                let f = &cache.feat[p * k..(p + 1) * k];
                gate(f, &cache.consensus, &mut v);
                dv.iter_mut().for_each(|x| *x = 0.0);
                layer.backward(&grad.data[p..p + 1], &cache.contrast_logits[p..p + 1], &v, &mut dv);
                for j in 0..k {
                    dfeat[p * k + j] += dv[j] * cache.consensus[j];
                    dconsensus[j] += dv[j] * f[j];
                }
                let q = pixels + p;
                layer.backward(&grad.data[q..q + 1], &cache.contrast_logits[q..q + 1], &zeros, &mut scratch);
            }
        }

        if let (Some(layer), Some(grad)) = (self.cls.as_mut(), grads.pred_cls.as_ref()) {
            check_len(grad, n * classes, "classification gradient")?;
            let mut dmean = vec![0.0; k];
            for ni in 0..n {
                dmean.iter_mut().for_each(|v| *v = 0.0);
                let span = ni * classes..(ni + 1) * classes;
                layer.backward(
                    &grad.data[span.clone()],
                    &cache.cls_logits[span],
                    &cache.image_means[ni * k..(ni + 1) * k],
                    &mut dmean,
                );
                for pix in 0..hw {
                    let p = ni * hw + pix;
                    for j in 0..k {
                        dfeat[p * k + j] += dmean[j] / hw as f64;
                    }
                }
            }
        }

        // The consensus is the mean feature over the whole group.
        for p in 0..pixels {
            for j in 0..k {
                dfeat[p * k + j] += dconsensus[j] / pixels as f64;
            }
        }

        let mut x = vec![0.0; c];
        let mut dh1 = vec![0.0; k];
        let mut dx = vec![0.0; c];
        for p in 0..pixels {
            let span = p * k..(p + 1) * k;
            if dfeat[span.clone()].iter().all(|g| *g == 0.0) {
                continue;
            }
            dh1.iter_mut().for_each(|v| *v = 0.0);
            self.conv5.backward(&dfeat[span.clone()], &cache.a2[span.clone()], &cache.h1[span.clone()], &mut dh1);
            gather_pixel(&cache.images, p, hw, &mut x);
            self.conv1.backward(&dh1, &cache.a1[span], &x, &mut dx);
        }
        Ok(())
    }

    fn parameters(&self) -> Vec<&Parameter> {
        let mut params: Vec<&Parameter> = Vec::new();
        params.extend(self.conv1.parameters());
        params.extend(self.conv5.parameters());
        params.extend(self.decoder.parameters());
        for head in [&self.cls, &self.contrast, &self.cls_mask].into_iter().flatten() {
            params.extend(head.parameters());
        }
        params
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        let mut params: Vec<&mut Parameter> = Vec::new();
        params.extend(self.conv1.parameters_mut());
        params.extend(self.conv5.parameters_mut());
        params.extend(self.decoder.parameters_mut());
        for head in [&mut self.cls, &mut self.contrast, &mut self.cls_mask].into_iter().flatten() {
            params.extend(head.parameters_mut());
        }
        params
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
        if !training {
            self.cache = None;
        }
    }

    fn is_training(&self) -> bool {
        self.training
    }

    fn describe(&self) -> String {
        let mut lines = vec![format!(
            "{}(in_channels={}, hidden={}, num_classes={})",
            self.config.kind, self.config.in_channels, self.config.hidden, self.config.num_classes
        )];
        let mut layers = vec![&self.conv1, &self.conv5, &self.decoder];
        layers.extend([&self.cls, &self.contrast, &self.cls_mask].into_iter().flatten());
        for layer in layers {
            let name = layer.weight.name.trim_end_matches(".weight");
            lines.push(format!(
                "  ({}): PixelDense({} -> {}, {:?})",
                name, layer.in_dim, layer.out_dim, layer.activator
            ));
        }
        lines.join("\n")
    }
}

/// Copies the channel vector of flat pixel index `p` into `out`.
fn gather_pixel(images: &Tensor, p: usize, hw: usize, out: &mut [f64]) {
    let c = out.len();
    let (ni, pix) = (p / hw, p % hw);
    for (ch, slot) in out.iter_mut().enumerate() {
        *slot = images.data[(ni * c + ch) * hw + pix];
    }
}

fn gate(feat: &[f64], consensus: &[f64], out: &mut [f64]) {
    for ((o, f), g) in out.iter_mut().zip(feat).zip(consensus) {
        *o = f * g;
    }
}

/// `[f, f ⊙ g]`
fn decoder_input(feat: &[f64], consensus: &[f64], out: &mut [f64]) {
    let k = feat.len();
    out[..k].copy_from_slice(feat);
    gate(feat, consensus, &mut out[k..]);
}

fn check_len(grad: &Tensor, expected: usize, what: &str) -> Result<()> {
    if grad.numel() != expected {
        return Err(CosalError::Shape(format!(
            "{} has {} values, expected {}",
            what,
            grad.numel(),
            expected
        )));
    }
    Ok(())
}
