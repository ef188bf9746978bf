//! Workflow template graphs and parameter substitution.
//!
//! A template is JSON with a `nodes` object (node id -> `{class_type,
//! inputs, ...}`) and a `connections` list. Links between nodes are encoded
//! inside `inputs` as `[source_node_id, output_index]`, the format the engine
//! consumes. Substitution never mutates the template: it clones it and writes
//! request-derived values into node inputs, located by `class_type`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::model::ModelType;
use crate::resolution::ResolutionError;

// ---------------------------------------------------------------------------
// Node class types
// ---------------------------------------------------------------------------

/// Nodes carrying prompt text, with the input that holds it.
const PROMPT_NODES: &[(&str, &str)] = &[
    ("CLIPTextEncode", "text"),
    ("TextEncodeQwenImageEdit", "prompt"),
    ("TextEncodeQwenImageEditPlus", "prompt"),
    ("GeminiImageNode", "prompt"),
    ("GeminiImage2Node", "prompt"),
    ("ByteDanceSeedreamNode", "prompt"),
];

/// Nodes carrying a seed, with the input that holds it.
const SEED_NODES: &[(&str, &str)] = &[
    ("KSampler", "seed"),
    ("KSamplerAdvanced", "noise_seed"),
    ("RandomNoise", "noise_seed"),
    ("UltimateSDUpscale", "seed"),
    ("GeminiImageNode", "seed"),
    ("GeminiImage2Node", "seed"),
    ("ByteDanceSeedreamNode", "seed"),
];

/// Nodes whose `positive` / `negative` inputs lead back to the prompts.
/// Guiders without a negative branch take `conditioning` instead.
const SAMPLER_NODES: &[&str] = &["KSampler", "KSamplerAdvanced", "CFGGuider", "BasicGuider"];

/// Upper bound on conditioning hops between a sampler and its prompt node.
const MAX_CONDITIONING_HOPS: usize = 8;

/// Nodes that drive sampling; steps, cfg, sampler and scheduler land here.
const SAMPLING_NODES: &[&str] = &[
    "KSampler",
    "KSamplerAdvanced",
    "KSamplerSelect",
    "BasicScheduler",
    "CFGGuider",
    "UltimateSDUpscale",
];

/// Nodes that fix output dimensions and batch size.
const LATENT_NODES: &[&str] = &[
    "EmptyLatentImage",
    "EmptySD3LatentImage",
    "WanImageToVideo",
    "ByteDanceSeedreamNode",
];

const GUIDANCE_NODES: &[&str] = &["FluxGuidance"];
const UNET_NODES: &[&str] = &["UNETLoader"];
const CHECKPOINT_NODES: &[&str] = &["CheckpointLoaderSimple"];
const CLIP_NODES: &[&str] = &["CLIPLoader", "DualCLIPLoader"];
const VAE_NODES: &[&str] = &["VAELoader"];
const IMAGE_NODES: &[&str] = &["LoadImage"];
/// Nodes that set video length (`length`) or frame rate (`fps`).
const VIDEO_NODES: &[&str] = &["WanImageToVideo", "CreateVideo"];
const UPSCALER_NODES: &[(&str, &str)] = &[
    ("UltimateSDUpscale", "upscale_by"),
    ("ImageScaleBy", "scale_by"),
    ("LatentUpscaleBy", "scale_by"),
];

/// Single LoRA loader nodes that can be cloned into a chain.
const LORA_LOADER_NODES: &[&str] = &["LoraLoader", "LoraLoaderModelOnly"];

/// Input naming the first slot of a multi-LoRA stack node.
const LORA_STACK_FIRST_INPUT: &str = "lora_01";

/// Value written to unused multi-LoRA stack slots. A single loader whose
/// `lora_name` is this, empty, or missing is a placeholder for user LoRAs.
const LORA_STACK_EMPTY: &str = "None";

// ---------------------------------------------------------------------------
// Graph
// ---------------------------------------------------------------------------

/// A parsed workflow template. Unknown top-level fields are kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowGraph {
    pub nodes: Map<String, Value>,
    pub connections: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl WorkflowGraph {
    /// Parse and validate a template.
    ///
    /// Requires a `nodes` object and a `connections` list; every node must
    /// have a string `class_type` and an object `inputs`.
    pub fn parse(value: &Value) -> Result<Self, ResolutionError> {
        let obj = value
            .as_object()
            .ok_or_else(|| ResolutionError::template_malformed("template is not a JSON object"))?;

        let nodes = obj
            .get("nodes")
            .and_then(Value::as_object)
            .ok_or_else(|| ResolutionError::template_malformed("template has no 'nodes' object"))?;

        let connections = obj
            .get("connections")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                ResolutionError::template_malformed("template has no 'connections' list")
            })?;

        for (id, node) in nodes {
            let has_class = node.get("class_type").and_then(Value::as_str).is_some();
            let has_inputs = node.get("inputs").is_some_and(Value::is_object);
            if !has_class || !has_inputs {
                return Err(ResolutionError::template_malformed(format!(
                    "node '{id}' must have a class_type and an inputs object"
                )));
            }
        }

        let extra = obj
            .iter()
            .filter(|(k, _)| k.as_str() != "nodes" && k.as_str() != "connections")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(Self {
            nodes: nodes.clone(),
            connections: connections.clone(),
            extra,
        })
    }

    pub fn class_of(&self, id: &str) -> Option<&str> {
        self.nodes.get(id)?.get("class_type")?.as_str()
    }

    pub fn inputs(&self, id: &str) -> Option<&Map<String, Value>> {
        self.nodes.get(id)?.get("inputs")?.as_object()
    }

    fn inputs_mut(&mut self, id: &str) -> Option<&mut Map<String, Value>> {
        self.nodes.get_mut(id)?.get_mut("inputs")?.as_object_mut()
    }

    pub fn has_input(&self, id: &str, name: &str) -> bool {
        self.inputs(id).is_some_and(|inputs| inputs.contains_key(name))
    }

    /// Write an input, creating it when absent. Returns false for unknown nodes.
    pub fn set_input(&mut self, id: &str, name: &str, value: Value) -> bool {
        match self.inputs_mut(id) {
            Some(inputs) => {
                inputs.insert(name.to_string(), value);
                true
            }
            None => false,
        }
    }

    /// Overwrite an input only if the node already declares it.
    pub fn set_existing_input(&mut self, id: &str, name: &str, value: Value) -> bool {
        match self.inputs_mut(id).and_then(|inputs| inputs.get_mut(name)) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Ids of nodes whose class is one of `classes`, in graph order.
    ///
    /// Numeric ids sort numerically, others lexically after them.
    pub fn nodes_of_class(&self, classes: &[&str]) -> Vec<String> {
        self.sorted_node_ids()
            .into_iter()
            .filter(|id| self.class_of(id).is_some_and(|c| classes.contains(&c)))
            .collect()
    }

    /// Every node id in graph order.
    pub fn sorted_node_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.nodes.keys().cloned().collect();
        ids.sort_by(|a, b| match (a.parse::<u64>(), b.parse::<u64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            (Ok(_), Err(_)) => std::cmp::Ordering::Less,
            (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
            (Err(_), Err(_)) => a.cmp(b),
        });
        ids
    }

    /// Source node of a linked input (`[source_id, output_index]`).
    pub fn link_source(&self, id: &str, input: &str) -> Option<(&str, u64)> {
        let link = self.inputs(id)?.get(input)?.as_array()?;
        match link.as_slice() {
            [Value::String(src), idx] => Some((src.as_str(), idx.as_u64()?)),
            _ => None,
        }
    }

    /// Smallest numeric id greater than every numeric id in the graph.
    pub fn next_node_id(&self) -> u64 {
        self.nodes
            .keys()
            .filter_map(|id| id.parse::<u64>().ok())
            .max()
            .map_or(1, |max| max + 1)
    }

    /// The graph in the engine's prompt format: the bare node map.
    pub fn to_prompt(&self) -> Value {
        Value::Object(self.nodes.clone())
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

// ---------------------------------------------------------------------------
// Substitution
// ---------------------------------------------------------------------------

/// Which substitution contract applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Generation(ModelType),
    Upscale,
}

/// A LoRA resolved to its weight file.
#[derive(Debug, Clone, PartialEq)]
pub struct LoraBinding {
    pub file: String,
    pub strength_model: f64,
    pub strength_clip: f64,
}

/// Weight files of a base model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeightFiles {
    pub unet: Option<String>,
    pub clip: Option<String>,
    pub vae: Option<String>,
}

/// Request-derived values ready to be written into a template.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Substitution {
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub seed: u64,
    pub steps: Option<u32>,
    pub cfg: Option<f64>,
    pub sampler_name: Option<String>,
    pub scheduler: Option<String>,
    pub guidance: Option<f64>,
    pub denoise: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub batch_size: Option<u8>,
    /// File name of the input image inside the engine's input directory.
    pub image: Option<String>,
    /// Further input images, written to later image-load nodes in order.
    pub extra_images: Vec<String>,
    /// Video length in frames.
    pub frames: Option<u32>,
    pub fps: Option<u32>,
    pub weights: WeightFiles,
    pub loras: Vec<LoraBinding>,
    pub upscale_by: Option<f64>,
}

/// Materialize `template` for one request.
pub fn substitute(
    template: &WorkflowGraph,
    target: Target,
    sub: &Substitution,
) -> Result<WorkflowGraph, ResolutionError> {
    let mut graph = template.clone();

    match target {
        Target::Generation(model_type) => {
            write_prompts(&mut graph, sub)?;
            write_sampling(&mut graph, sub, !model_type.is_hosted())?;
            write_latent(&mut graph, sub, model_type)?;
            write_guidance(&mut graph, sub);
            write_weights(&mut graph, &sub.weights, model_type)?;
            write_loras(&mut graph, &sub.loras)?;
            write_video(&mut graph, sub);
        }
        Target::Upscale => {
            write_sampling(&mut graph, sub, false)?;
            write_upscale_factor(&mut graph, sub)?;
        }
    }

    write_image(&mut graph, sub, target == Target::Upscale)?;
    write_seed(&mut graph, sub.seed);

    Ok(graph)
}

/// Prepend trigger words that the prompt does not already contain.
pub fn apply_trigger_words<'a>(prompt: &str, triggers: impl IntoIterator<Item = &'a str>) -> String {
    let mut missing: Vec<&str> = Vec::new();
    for trigger in triggers {
        let trigger = trigger.trim();
        if !trigger.is_empty() && !prompt.contains(trigger) && !missing.contains(&trigger) {
            missing.push(trigger);
        }
    }
    if missing.is_empty() {
        prompt.to_string()
    } else {
        format!("{}, {prompt}", missing.join(", "))
    }
}

fn prompt_input(class: &str) -> Option<&'static str> {
    PROMPT_NODES
        .iter()
        .find(|(c, _)| *c == class)
        .map(|(_, input)| *input)
}

fn is_prompt_node(graph: &WorkflowGraph, id: &str) -> bool {
    graph.class_of(id).and_then(prompt_input).is_some()
}

/// Follow a conditioning link upstream until a prompt node is reached.
///
/// Nodes that carry both branches (`WanImageToVideo`,
/// `ControlNetApplyAdvanced`, ...) expose positive on output 0 and negative
/// on output 1, so the walk picks the matching input. Single-branch nodes
/// (`FluxGuidance`, `ReferenceLatent`, `ControlNetApply`) pass through
/// `conditioning`.
fn trace_prompt<'g>(graph: &'g WorkflowGraph, source: (&'g str, u64)) -> Option<&'g str> {
    let (mut node, mut output) = source;
    for _ in 0..MAX_CONDITIONING_HOPS {
        if is_prompt_node(graph, node) {
            return Some(node);
        }
        let next = if graph.has_input(node, "positive") && graph.has_input(node, "negative") {
            let branch = if output == 1 { "negative" } else { "positive" };
            graph.link_source(node, branch)
        } else {
            graph.link_source(node, "conditioning")
        };
        (node, output) = next?;
    }
    None
}

/// The prompt node feeding `input` of the first sampler that has one.
fn sampler_prompt(graph: &WorkflowGraph, samplers: &[String], input: &str) -> Option<String> {
    samplers
        .iter()
        .filter_map(|id| graph.link_source(id, input))
        .find_map(|source| trace_prompt(graph, source))
        .map(str::to_string)
}

fn write_prompts(graph: &mut WorkflowGraph, sub: &Substitution) -> Result<(), ResolutionError> {
    let samplers = graph.nodes_of_class(SAMPLER_NODES);

    let positive = if samplers.is_empty() {
        // Hosted-model templates carry the prompt on the API node itself.
        let prompt_classes: Vec<&str> = PROMPT_NODES.iter().map(|(c, _)| *c).collect();
        graph
            .nodes_of_class(&prompt_classes)
            .into_iter()
            .next()
            .ok_or_else(|| ResolutionError::template_malformed("no prompt node in template"))?
    } else {
        sampler_prompt(graph, &samplers, "positive")
            .or_else(|| sampler_prompt(graph, &samplers, "conditioning"))
            .ok_or_else(|| {
                ResolutionError::template_malformed(
                    "sampler positive input does not lead to a prompt node",
                )
            })?
    };
    let negative = sampler_prompt(graph, &samplers, "negative");

    write_prompt_text(graph, &positive, &sub.prompt);
    if let (Some(negative), Some(text)) = (negative, sub.negative_prompt.as_deref()) {
        // A negative branch zeroed out from the positive encoder has no text of its own.
        if negative != positive {
            write_prompt_text(graph, &negative, text);
        }
    }
    Ok(())
}

fn write_prompt_text(graph: &mut WorkflowGraph, id: &str, text: &str) {
    if let Some(input) = graph.class_of(id).and_then(prompt_input) {
        graph.set_input(id, input, json!(text));
    }
}

fn write_sampling(
    graph: &mut WorkflowGraph,
    sub: &Substitution,
    required: bool,
) -> Result<(), ResolutionError> {
    let ids = graph.nodes_of_class(SAMPLING_NODES);
    if required && ids.is_empty() && graph.nodes_of_class(&["RandomNoise"]).is_empty() {
        return Err(ResolutionError::template_malformed("no sampler node in template"));
    }

    let values: [(&str, Option<Value>); 5] = [
        ("steps", sub.steps.map(Value::from)),
        ("cfg", sub.cfg.map(Value::from)),
        ("sampler_name", sub.sampler_name.clone().map(Value::from)),
        ("scheduler", sub.scheduler.clone().map(Value::from)),
        ("denoise", sub.denoise.map(Value::from)),
    ];
    for id in &ids {
        for (name, value) in &values {
            if let Some(value) = value {
                graph.set_existing_input(id, name, value.clone());
            }
        }
    }
    Ok(())
}

fn write_latent(
    graph: &mut WorkflowGraph,
    sub: &Substitution,
    model_type: ModelType,
) -> Result<(), ResolutionError> {
    let ids = graph.nodes_of_class(LATENT_NODES);
    let wants_size = sub.width.is_some() || sub.height.is_some();
    let size_required = matches!(model_type, ModelType::Flux)
        || (matches!(model_type, ModelType::Qwen) && sub.image.is_none());
    if ids.is_empty() && size_required && wants_size {
        return Err(ResolutionError::template_malformed("no latent image node in template"));
    }

    for id in &ids {
        if let Some(width) = sub.width {
            graph.set_existing_input(id, "width", json!(width));
        }
        if let Some(height) = sub.height {
            graph.set_existing_input(id, "height", json!(height));
        }
        if let Some(batch) = sub.batch_size {
            graph.set_existing_input(id, "batch_size", json!(batch));
        }
    }
    Ok(())
}

fn write_guidance(graph: &mut WorkflowGraph, sub: &Substitution) {
    if let Some(guidance) = sub.guidance {
        for id in graph.nodes_of_class(GUIDANCE_NODES) {
            graph.set_existing_input(&id, "guidance", json!(guidance));
        }
    }
}

fn write_weights(
    graph: &mut WorkflowGraph,
    weights: &WeightFiles,
    model_type: ModelType,
) -> Result<(), ResolutionError> {
    if model_type.is_hosted() {
        return Ok(());
    }

    if let Some(unet) = &weights.unet {
        let unet_nodes = graph.nodes_of_class(UNET_NODES);
        if let Some(id) = unet_nodes.first() {
            graph.set_input(id, "unet_name", json!(unet));
        } else if let Some(id) = graph.nodes_of_class(CHECKPOINT_NODES).first() {
            graph.set_input(id, "ckpt_name", json!(unet));
        } else {
            return Err(ResolutionError::template_malformed(
                "no model loader node in template",
            ));
        }
    }

    if let Some(clip) = &weights.clip {
        if let Some(id) = graph.nodes_of_class(CLIP_NODES).first() {
            let input = if graph.has_input(id, "clip_name") {
                "clip_name"
            } else {
                "clip_name1"
            };
            graph.set_input(id, input, json!(clip));
        }
    }

    if let Some(vae) = &weights.vae {
        if let Some(id) = graph.nodes_of_class(VAE_NODES).first() {
            graph.set_input(id, "vae_name", json!(vae));
        }
    }
    Ok(())
}

fn write_image(
    graph: &mut WorkflowGraph,
    sub: &Substitution,
    required: bool,
) -> Result<(), ResolutionError> {
    let Some(first) = &sub.image else {
        if required {
            return Err(ResolutionError::template_malformed("upscale requires an input image"));
        }
        return Ok(());
    };

    let ids = graph.nodes_of_class(IMAGE_NODES);
    let images: Vec<&String> = std::iter::once(first).chain(&sub.extra_images).collect();
    if ids.len() < images.len() {
        return Err(ResolutionError::template_malformed(format!(
            "template has {} image load nodes, {} images supplied",
            ids.len(),
            images.len()
        )));
    }
    for (id, image) in ids.iter().zip(images) {
        graph.set_input(id, "image", json!(image));
    }
    Ok(())
}

fn write_video(graph: &mut WorkflowGraph, sub: &Substitution) {
    for id in graph.nodes_of_class(VIDEO_NODES) {
        if let Some(frames) = sub.frames {
            graph.set_existing_input(&id, "length", json!(frames));
        }
        if let Some(fps) = sub.fps {
            graph.set_existing_input(&id, "fps", json!(fps));
        }
    }
}

fn write_seed(graph: &mut WorkflowGraph, seed: u64) {
    for (class, input) in SEED_NODES {
        for id in graph.nodes_of_class(&[*class]) {
            if *class == "KSampler" {
                graph.set_input(&id, input, json!(seed));
            } else {
                graph.set_existing_input(&id, input, json!(seed));
            }
        }
    }
}

fn write_upscale_factor(graph: &mut WorkflowGraph, sub: &Substitution) -> Result<(), ResolutionError> {
    let classes: Vec<&str> = UPSCALER_NODES.iter().map(|(c, _)| *c).collect();
    let ids = graph.nodes_of_class(&classes);
    if ids.is_empty() {
        return Err(ResolutionError::template_malformed("no upscale node in template"));
    }
    if let Some(factor) = sub.upscale_by {
        for id in ids {
            let input = graph
                .class_of(&id)
                .and_then(|c| UPSCALER_NODES.iter().find(|(uc, _)| *uc == c))
                .map(|(_, input)| *input);
            if let Some(input) = input {
                graph.set_input(&id, input, json!(factor));
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// LoRA chaining
// ---------------------------------------------------------------------------

/// How a template expects multiple LoRAs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoraConvention {
    /// A single node with `lora_01..lora_NN` inputs.
    Stack { node_id: String, slots: usize },
    /// A placeholder loader reserved for user LoRAs: filled with the first
    /// one and cloned in series for the rest, bypassed when none are asked for.
    Slot { node_id: String },
    /// Only built-in loaders with fixed weights. User LoRAs are chained after
    /// each loader at the end of a model branch; the built-ins stay as they are.
    After { tails: Vec<String> },
    /// The template has no LoRA slot.
    None,
}

/// Inspect the template to pick its LoRA convention.
pub fn detect_lora_convention(graph: &WorkflowGraph) -> LoraConvention {
    for id in graph.sorted_node_ids() {
        if graph.has_input(&id, LORA_STACK_FIRST_INPUT) {
            let slots = graph
                .inputs(&id)
                .map(|inputs| {
                    inputs
                        .keys()
                        .filter(|k| {
                            k.strip_prefix("lora_")
                                .is_some_and(|n| n.chars().all(|c| c.is_ascii_digit()))
                        })
                        .count()
                })
                .unwrap_or(0);
            return LoraConvention::Stack { node_id: id, slots };
        }
    }

    let loaders = graph.nodes_of_class(LORA_LOADER_NODES);
    if let Some(node_id) = loaders.iter().find(|id| is_placeholder_loader(graph, id)) {
        return LoraConvention::Slot {
            node_id: node_id.clone(),
        };
    }
    let tails: Vec<String> = loaders
        .iter()
        .filter(|id| {
            !loaders
                .iter()
                .any(|other| graph.link_source(other, "model") == Some((id.as_str(), 0)))
        })
        .cloned()
        .collect();
    if tails.is_empty() {
        LoraConvention::None
    } else {
        LoraConvention::After { tails }
    }
}

fn is_placeholder_loader(graph: &WorkflowGraph, id: &str) -> bool {
    match graph.inputs(id).and_then(|inputs| inputs.get("lora_name")) {
        None | Some(Value::Null) => true,
        Some(Value::String(name)) => {
            let name = name.trim();
            name.is_empty() || name == LORA_STACK_EMPTY
        }
        Some(_) => false,
    }
}

fn write_loras(graph: &mut WorkflowGraph, loras: &[LoraBinding]) -> Result<(), ResolutionError> {
    match detect_lora_convention(graph) {
        LoraConvention::Stack { node_id, slots } => write_lora_stack(graph, &node_id, slots, loras),
        LoraConvention::Slot { node_id } => {
            match loras.split_first() {
                Some((first, rest)) => {
                    set_lora_inputs(graph, &node_id, first);
                    chain_loras_after(graph, &node_id, rest);
                }
                None => bypass_loader(graph, &node_id),
            }
            Ok(())
        }
        LoraConvention::After { tails } => {
            for tail in &tails {
                chain_loras_after(graph, tail, loras);
            }
            Ok(())
        }
        LoraConvention::None if loras.is_empty() => Ok(()),
        LoraConvention::None => Err(ResolutionError::template_malformed(
            "LoRAs requested but template has no LoRA loader",
        )),
    }
}

fn write_lora_stack(
    graph: &mut WorkflowGraph,
    node_id: &str,
    slots: usize,
    loras: &[LoraBinding],
) -> Result<(), ResolutionError> {
    if loras.len() > slots {
        return Err(ResolutionError::template_malformed(format!(
            "template LoRA stack has {slots} slots, {} requested",
            loras.len()
        )));
    }
    for slot in 1..=slots {
        let lora = loras.get(slot - 1);
        let name = lora.map_or(json!(LORA_STACK_EMPTY), |l| json!(l.file));
        let strength = lora.map_or(json!(0.0), |l| json!(l.strength_model));
        graph.set_input(node_id, &format!("lora_{slot:02}"), name);
        graph.set_input(node_id, &format!("strength_{slot:02}"), strength);
        let clip_key = format!("strength_clip_{slot:02}");
        if graph.has_input(node_id, &clip_key) {
            let clip = lora.map_or(json!(0.0), |l| json!(l.strength_clip));
            graph.set_input(node_id, &clip_key, clip);
        }
    }
    Ok(())
}

fn set_lora_inputs(graph: &mut WorkflowGraph, id: &str, lora: &LoraBinding) {
    graph.set_input(id, "lora_name", json!(lora.file));
    graph.set_input(id, "strength_model", json!(lora.strength_model));
    graph.set_existing_input(id, "strength_clip", json!(lora.strength_clip));
}

/// Clone `anchor` once per LoRA, wire the clones in series behind it, and
/// move every other consumer of `anchor` to the end of the new chain.
/// The anchor itself is not modified.
fn chain_loras_after(graph: &mut WorkflowGraph, anchor: &str, loras: &[LoraBinding]) {
    if loras.is_empty() {
        return;
    }
    let Some(template_node) = graph.nodes.get(anchor).cloned() else {
        return;
    };
    let has_clip = graph.has_input(anchor, "clip");

    let mut chain: Vec<String> = Vec::with_capacity(loras.len() + 1);
    chain.push(anchor.to_string());
    let mut previous = anchor.to_string();
    for lora in loras {
        let id = graph.next_node_id().to_string();
        graph.nodes.insert(id.clone(), template_node.clone());
        graph.set_input(&id, "model", json!([previous, 0]));
        if has_clip {
            graph.set_input(&id, "clip", json!([previous, 1]));
        }
        set_lora_inputs(graph, &id, lora);
        chain.push(id.clone());
        previous = id;
    }

    let last = previous;
    redirect_links(graph, anchor, &chain, |output| Some(json!([last, output])));
}

/// Remove an unused loader and connect its consumers straight to its
/// sources: output 0 to the `model` input, output 1 to `clip`.
fn bypass_loader(graph: &mut WorkflowGraph, id: &str) {
    let Some(node) = graph.nodes.remove(id) else {
        return;
    };
    let source = |input: &str| node.get("inputs").and_then(|i| i.get(input)).cloned();
    let model = source("model");
    let clip = source("clip");
    redirect_links(graph, id, &[], |output| match output {
        0 => model.clone(),
        1 => clip.clone(),
        _ => None,
    });
}

/// Rewrite every link that reads from `from`, except on nodes in `skip`.
/// `target` maps the output index to the replacement link; `None` keeps it.
fn redirect_links(
    graph: &mut WorkflowGraph,
    from: &str,
    skip: &[String],
    target: impl Fn(u64) -> Option<Value>,
) {
    for (id, node) in graph.nodes.iter_mut() {
        if skip.contains(id) {
            continue;
        }
        let Some(inputs) = node.get_mut("inputs").and_then(Value::as_object_mut) else {
            continue;
        };
        for value in inputs.values_mut() {
            let output = match value.as_array().map(Vec::as_slice) {
                Some([Value::String(src), idx]) if src == from => idx.as_u64(),
                _ => None,
            };
            if let Some(replacement) = output.and_then(&target) {
                *value = replacement;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolution::ResolutionReason;
    use assert_matches::assert_matches;

    fn flux_template() -> WorkflowGraph {
        WorkflowGraph::parse(&json!({
            "nodes": {
                "6": { "class_type": "CLIPTextEncode", "inputs": { "text": "", "clip": ["50", 1] } },
                "7": { "class_type": "CLIPTextEncode", "inputs": { "text": "", "clip": ["50", 1] } },
                "31": { "class_type": "KSampler", "inputs": {
                    "seed": 1, "steps": 20, "cfg": 1.0, "sampler_name": "euler",
                    "scheduler": "simple", "denoise": 1.0,
                    "model": ["50", 0], "positive": ["35", 0], "negative": ["7", 0],
                    "latent_image": ["42", 0]
                } },
                "35": { "class_type": "FluxGuidance", "inputs": { "guidance": 3.5, "conditioning": ["6", 0] } },
                "37": { "class_type": "UNETLoader", "inputs": { "unet_name": "old.safetensors" } },
                "38": { "class_type": "DualCLIPLoader", "inputs": { "clip_name1": "a", "clip_name2": "b" } },
                "39": { "class_type": "VAELoader", "inputs": { "vae_name": "ae.safetensors" } },
                "42": { "class_type": "EmptySD3LatentImage", "inputs": { "width": 512, "height": 512, "batch_size": 1 } },
                "50": { "class_type": "LoraLoader", "inputs": {
                    "lora_name": "None", "strength_model": 1.0, "strength_clip": 1.0,
                    "model": ["37", 0], "clip": ["38", 0]
                } },
                "136": { "class_type": "SaveImage", "inputs": { "filename_prefix": "yeepay/ComfyUI", "images": ["8", 0] } }
            },
            "connections": [],
            "version": 2
        }))
        .unwrap()
    }

    fn sub() -> Substitution {
        Substitution {
            prompt: "a red cat".into(),
            negative_prompt: Some("blurry".into()),
            seed: 7,
            width: Some(1024),
            height: Some(768),
            batch_size: Some(2),
            guidance: Some(4.0),
            weights: WeightFiles {
                unet: Some("flux1-dev.safetensors".into()),
                clip: Some("t5xxl.safetensors".into()),
                vae: None,
            },
            ..Substitution::default()
        }
    }

    fn lora(file: &str) -> LoraBinding {
        LoraBinding {
            file: file.into(),
            strength_model: 0.8,
            strength_clip: 0.6,
        }
    }

    #[test]
    fn parse_requires_nodes_and_connections() {
        let err = WorkflowGraph::parse(&json!({ "nodes": {} })).unwrap_err();
        assert_eq!(err.reason, ResolutionReason::TemplateMalformed);
        let err = WorkflowGraph::parse(&json!({ "connections": [] })).unwrap_err();
        assert_eq!(err.reason, ResolutionReason::TemplateMalformed);
        let err = WorkflowGraph::parse(&json!({
            "nodes": { "1": { "inputs": {} } }, "connections": []
        }))
        .unwrap_err();
        assert_eq!(err.reason, ResolutionReason::TemplateMalformed);
    }

    #[test]
    fn unknown_fields_survive_round_trip() {
        let graph = flux_template();
        assert_eq!(graph.to_value()["version"], 2);
    }

    #[test]
    fn flux_substitution_writes_every_slot() {
        let template = flux_template();
        let graph = substitute(&template, Target::Generation(ModelType::Flux), &sub()).unwrap();

        assert_eq!(graph.inputs("6").unwrap()["text"], "a red cat");
        assert_eq!(graph.inputs("7").unwrap()["text"], "blurry");
        assert_eq!(graph.inputs("31").unwrap()["seed"], 7);
        assert_eq!(graph.inputs("35").unwrap()["guidance"], 4.0);
        assert_eq!(graph.inputs("37").unwrap()["unet_name"], "flux1-dev.safetensors");
        assert_eq!(graph.inputs("38").unwrap()["clip_name1"], "t5xxl.safetensors");
        assert_eq!(graph.inputs("39").unwrap()["vae_name"], "ae.safetensors");
        assert_eq!(graph.inputs("42").unwrap()["width"], 1024);
        assert_eq!(graph.inputs("42").unwrap()["height"], 768);
        assert_eq!(graph.inputs("42").unwrap()["batch_size"], 2);
    }

    #[test]
    fn substitution_leaves_template_untouched() {
        let template = flux_template();
        let before = template.clone();
        let _ = substitute(&template, Target::Generation(ModelType::Flux), &sub()).unwrap();
        assert_eq!(template, before);
    }

    #[test]
    fn substitution_preserves_node_ids_and_classes() {
        let template = flux_template();
        let mut s = sub();
        s.loras = vec![lora("a.safetensors")];
        let graph = substitute(&template, Target::Generation(ModelType::Flux), &s).unwrap();
        assert_eq!(graph.connections, template.connections);
        assert_eq!(graph.extra, template.extra);
        for (id, node) in &template.nodes {
            assert_eq!(graph.nodes[id]["class_type"], node["class_type"]);
        }
    }

    #[test]
    fn missing_sampler_is_malformed() {
        let mut template = flux_template();
        template.nodes.remove("31");
        let err = substitute(&template, Target::Generation(ModelType::Flux), &sub()).unwrap_err();
        assert_eq!(err.reason, ResolutionReason::TemplateMalformed);
    }

    #[test]
    fn no_loras_bypasses_the_placeholder_loader() {
        let graph = substitute(&flux_template(), Target::Generation(ModelType::Flux), &sub()).unwrap();
        assert!(!graph.nodes.contains_key("50"));
        assert_eq!(graph.inputs("31").unwrap()["model"], json!(["37", 0]));
        assert_eq!(graph.inputs("6").unwrap()["clip"], json!(["38", 0]));
        assert_eq!(graph.inputs("7").unwrap()["clip"], json!(["38", 0]));
    }

    #[test]
    fn slot_convention_clones_and_rewires() {
        let template = flux_template();
        assert_matches!(
            detect_lora_convention(&template),
            LoraConvention::Slot { ref node_id } if node_id == "50"
        );
        let mut s = sub();
        s.loras = vec![lora("a.safetensors"), lora("b.safetensors"), lora("c.safetensors")];
        let graph = substitute(&template, Target::Generation(ModelType::Flux), &s).unwrap();

        assert_eq!(graph.inputs("50").unwrap()["lora_name"], "a.safetensors");
        assert_eq!(graph.inputs("137").unwrap()["lora_name"], "b.safetensors");
        assert_eq!(graph.inputs("137").unwrap()["model"], json!(["50", 0]));
        assert_eq!(graph.inputs("138").unwrap()["lora_name"], "c.safetensors");
        assert_eq!(graph.inputs("138").unwrap()["clip"], json!(["137", 1]));
        assert_eq!(graph.inputs("138").unwrap()["strength_clip"], 0.6);
        // Model and clip consumers now read from the end of the chain.
        assert_eq!(graph.inputs("31").unwrap()["model"], json!(["138", 0]));
        assert_eq!(graph.inputs("6").unwrap()["clip"], json!(["138", 1]));
    }

    #[test]
    fn stack_convention_fills_slots() {
        let mut template = flux_template();
        template.nodes.remove("50");
        template.nodes.insert(
            "170".into(),
            json!({ "class_type": "Power Lora Loader", "inputs": {
                "lora_01": "None", "strength_01": 0.0,
                "lora_02": "None", "strength_02": 0.0,
                "lora_03": "None", "strength_03": 0.0,
                "lora_04": "None", "strength_04": 0.0,
                "model": ["37", 0]
            }}),
        );
        assert_matches!(
            detect_lora_convention(&template),
            LoraConvention::Stack { ref node_id, slots: 4 } if node_id == "170"
        );

        let mut s = sub();
        s.loras = vec![lora("a.safetensors"), lora("b.safetensors")];
        let graph = substitute(&template, Target::Generation(ModelType::Flux), &s).unwrap();
        let inputs = graph.inputs("170").unwrap();
        assert_eq!(inputs["lora_01"], "a.safetensors");
        assert_eq!(inputs["strength_02"], 0.8);
        assert_eq!(inputs["lora_03"], "None");
        assert_eq!(graph.nodes.len(), template.nodes.len());
    }

    #[test]
    fn loras_without_slot_are_malformed() {
        let mut template = flux_template();
        template.nodes.remove("50");
        let mut s = sub();
        s.loras = vec![lora("a.safetensors")];
        let err = substitute(&template, Target::Generation(ModelType::Flux), &s).unwrap_err();
        assert_eq!(err.reason, ResolutionReason::TemplateMalformed);
    }

    #[test]
    fn upscale_requires_image_and_upscaler() {
        let template = WorkflowGraph::parse(&json!({
            "nodes": {
                "1": { "class_type": "LoadImage", "inputs": { "image": "x.png" } },
                "2": { "class_type": "UltimateSDUpscale", "inputs": {
                    "upscale_by": 2.0, "seed": 0, "steps": 20, "image": ["1", 0]
                } }
            },
            "connections": []
        }))
        .unwrap();

        let s = Substitution {
            seed: 9,
            image: Some("foo.png".into()),
            upscale_by: Some(3.0),
            ..Substitution::default()
        };
        let graph = substitute(&template, Target::Upscale, &s).unwrap();
        assert_eq!(graph.inputs("1").unwrap()["image"], "foo.png");
        assert_eq!(graph.inputs("2").unwrap()["upscale_by"], 3.0);
        assert_eq!(graph.inputs("2").unwrap()["seed"], 9);

        let err = substitute(&template, Target::Upscale, &Substitution::default()).unwrap_err();
        assert_eq!(err.reason, ResolutionReason::TemplateMalformed);
    }

    #[test]
    fn hosted_model_writes_prompt_and_seed_on_api_node() {
        let template = WorkflowGraph::parse(&json!({
            "nodes": {
                "1": { "class_type": "GeminiImageNode", "inputs": { "prompt": "", "seed": 0 } },
                "2": { "class_type": "SaveImage", "inputs": { "images": ["1", 0] } }
            },
            "connections": []
        }))
        .unwrap();
        let s = Substitution {
            prompt: "a castle".into(),
            seed: 5,
            ..Substitution::default()
        };
        let graph = substitute(&template, Target::Generation(ModelType::Gemini), &s).unwrap();
        assert_eq!(graph.inputs("1").unwrap()["prompt"], "a castle");
        assert_eq!(graph.inputs("1").unwrap()["seed"], 5);
    }

    /// Image-to-video graph: both prompts reach the samplers only through
    /// `WanImageToVideo`, and each noise stage has a built-in speed-up LoRA.
    fn wan_template() -> WorkflowGraph {
        WorkflowGraph::parse(&json!({
            "nodes": {
                "84": { "class_type": "CLIPLoader", "inputs": { "clip_name": "umt5.safetensors", "type": "wan" } },
                "85": { "class_type": "KSamplerAdvanced", "inputs": {
                    "add_noise": "disable", "noise_seed": 0, "steps": 4, "cfg": 1.0,
                    "model": ["103", 0], "positive": ["98", 0], "negative": ["98", 1],
                    "latent_image": ["86", 0]
                } },
                "86": { "class_type": "KSamplerAdvanced", "inputs": {
                    "add_noise": "enable", "noise_seed": 0, "steps": 4, "cfg": 1.0,
                    "model": ["104", 0], "positive": ["98", 0], "negative": ["98", 1],
                    "latent_image": ["98", 2]
                } },
                "87": { "class_type": "VAEDecode", "inputs": { "samples": ["85", 0], "vae": ["90", 0] } },
                "89": { "class_type": "CLIPTextEncode", "inputs": { "text": "static, blurry", "clip": ["84", 0] } },
                "90": { "class_type": "VAELoader", "inputs": { "vae_name": "wan_vae.safetensors" } },
                "93": { "class_type": "CLIPTextEncode", "inputs": { "text": "", "clip": ["84", 0] } },
                "94": { "class_type": "CreateVideo", "inputs": { "fps": 16, "images": ["87", 0] } },
                "95": { "class_type": "UNETLoader", "inputs": { "unet_name": "wan_high.safetensors" } },
                "96": { "class_type": "UNETLoader", "inputs": { "unet_name": "wan_low.safetensors" } },
                "97": { "class_type": "LoadImage", "inputs": { "image": "" } },
                "98": { "class_type": "WanImageToVideo", "inputs": {
                    "width": 640, "height": 640, "length": 81, "batch_size": 1,
                    "positive": ["93", 0], "negative": ["89", 0], "vae": ["90", 0],
                    "start_image": ["97", 0]
                } },
                "101": { "class_type": "LoraLoaderModelOnly", "inputs": {
                    "lora_name": "lightx2v_high_noise.safetensors", "strength_model": 1.0,
                    "model": ["95", 0]
                } },
                "102": { "class_type": "LoraLoaderModelOnly", "inputs": {
                    "lora_name": "lightx2v_low_noise.safetensors", "strength_model": 1.0,
                    "model": ["96", 0]
                } },
                "103": { "class_type": "ModelSamplingSD3", "inputs": { "shift": 5.0, "model": ["102", 0] } },
                "104": { "class_type": "ModelSamplingSD3", "inputs": { "shift": 5.0, "model": ["101", 0] } },
                "108": { "class_type": "SaveVideo", "inputs": {
                    "filename_prefix": "video/yeepay_video", "video": ["94", 0]
                } }
            },
            "connections": []
        }))
        .unwrap()
    }

    fn wan_sub() -> Substitution {
        Substitution {
            prompt: "a dancing cat".into(),
            seed: 11,
            image: Some("cat.png".into()),
            frames: Some(48),
            fps: Some(16),
            ..Substitution::default()
        }
    }

    #[test]
    fn wan_prompts_are_traced_through_image_to_video() {
        let graph = substitute(&wan_template(), Target::Generation(ModelType::Wan), &wan_sub()).unwrap();

        assert_eq!(graph.inputs("93").unwrap()["text"], "a dancing cat");
        assert_eq!(graph.inputs("89").unwrap()["text"], "static, blurry");
        assert_eq!(graph.inputs("97").unwrap()["image"], "cat.png");
        assert_eq!(graph.inputs("98").unwrap()["length"], 48);
        assert_eq!(graph.inputs("94").unwrap()["fps"], 16);
        assert_eq!(graph.inputs("85").unwrap()["noise_seed"], 11);
        assert_eq!(graph.inputs("86").unwrap()["noise_seed"], 11);

        let mut s = wan_sub();
        s.negative_prompt = Some("watermark".into());
        let graph = substitute(&wan_template(), Target::Generation(ModelType::Wan), &s).unwrap();
        assert_eq!(graph.inputs("93").unwrap()["text"], "a dancing cat");
        assert_eq!(graph.inputs("89").unwrap()["text"], "watermark");
    }

    #[test]
    fn wan_builtin_loras_are_untouched_without_user_loras() {
        let template = wan_template();
        assert_matches!(
            detect_lora_convention(&template),
            LoraConvention::After { ref tails } if tails == &["101", "102"]
        );

        let graph = substitute(&template, Target::Generation(ModelType::Wan), &wan_sub()).unwrap();
        assert_eq!(graph.nodes["101"], template.nodes["101"]);
        assert_eq!(graph.nodes["102"], template.nodes["102"]);
        assert_eq!(graph.nodes.len(), template.nodes.len());
    }

    #[test]
    fn wan_user_loras_chain_after_builtins() {
        let template = wan_template();
        let mut s = wan_sub();
        s.loras = vec![lora("dance.safetensors")];
        let graph = substitute(&template, Target::Generation(ModelType::Wan), &s).unwrap();

        // Built-in loaders keep their weights.
        assert_eq!(graph.nodes["101"], template.nodes["101"]);
        assert_eq!(graph.nodes["102"], template.nodes["102"]);

        assert_eq!(graph.class_of("109"), Some("LoraLoaderModelOnly"));
        assert_eq!(graph.inputs("109").unwrap()["lora_name"], "dance.safetensors");
        assert_eq!(graph.inputs("109").unwrap()["strength_model"], 0.8);
        assert_eq!(graph.inputs("109").unwrap()["model"], json!(["101", 0]));
        assert_eq!(graph.inputs("104").unwrap()["model"], json!(["109", 0]));

        assert_eq!(graph.inputs("110").unwrap()["model"], json!(["102", 0]));
        assert_eq!(graph.inputs("103").unwrap()["model"], json!(["110", 0]));
    }

    #[test]
    fn unreachable_positive_prompt_is_malformed() {
        let mut template = wan_template();
        template.set_input("98", "positive", json!(["999", 0]));
        let err = substitute(&template, Target::Generation(ModelType::Wan), &wan_sub()).unwrap_err();
        assert_eq!(err.reason, ResolutionReason::TemplateMalformed);
    }

    #[test]
    fn qwen_edit_prompt_is_traced_through_reference_latent() {
        let template = WorkflowGraph::parse(&json!({
            "nodes": {
                "3": { "class_type": "KSampler", "inputs": {
                    "seed": 0, "steps": 8, "cfg": 1.0,
                    "model": ["66", 0], "positive": ["100", 0], "negative": ["101", 0],
                    "latent_image": ["88", 0]
                } },
                "37": { "class_type": "UNETLoader", "inputs": { "unet_name": "qwen_edit.safetensors" } },
                "38": { "class_type": "CLIPLoader", "inputs": { "clip_name": "qwen_vl.safetensors" } },
                "50": { "class_type": "LoraLoaderModelOnly", "inputs": {
                    "lora_name": "", "strength_model": 1.0, "model": ["37", 0]
                } },
                "66": { "class_type": "ModelSamplingAuraFlow", "inputs": { "shift": 3.0, "model": ["50", 0] } },
                "76": { "class_type": "TextEncodeQwenImageEdit", "inputs": { "prompt": "", "clip": ["38", 0] } },
                "78": { "class_type": "LoadImage", "inputs": { "image": "" } },
                "79": { "class_type": "LoadImage", "inputs": { "image": "" } },
                "88": { "class_type": "VAEEncode", "inputs": { "pixels": ["78", 0] } },
                "99": { "class_type": "ReferenceLatent", "inputs": { "conditioning": ["76", 0], "latent": ["88", 0] } },
                "100": { "class_type": "FluxGuidance", "inputs": { "guidance": 2.5, "conditioning": ["99", 0] } },
                "101": { "class_type": "ConditioningZeroOut", "inputs": { "conditioning": ["76", 0] } }
            },
            "connections": []
        }))
        .unwrap();

        let s = Substitution {
            prompt: "put the hat on the cat".into(),
            negative_prompt: Some("blurry".into()),
            seed: 3,
            image: Some("cat.png".into()),
            extra_images: vec!["hat.png".into()],
            ..Substitution::default()
        };
        let graph = substitute(&template, Target::Generation(ModelType::Qwen), &s).unwrap();

        // The zeroed-out negative shares the positive encoder and keeps its text.
        assert_eq!(graph.inputs("76").unwrap()["prompt"], "put the hat on the cat");
        assert_eq!(graph.inputs("78").unwrap()["image"], "cat.png");
        assert_eq!(graph.inputs("79").unwrap()["image"], "hat.png");
        assert!(!graph.nodes.contains_key("50"));
        assert_eq!(graph.inputs("66").unwrap()["model"], json!(["37", 0]));

        let mut three = s.clone();
        three.extra_images.push("scarf.png".into());
        let err = substitute(&template, Target::Generation(ModelType::Qwen), &three).unwrap_err();
        assert_eq!(err.reason, ResolutionReason::TemplateMalformed);
    }

    #[test]
    fn trigger_words_are_prepended_once() {
        assert_eq!(
            apply_trigger_words("a cat", ["anime style", "anime style"]),
            "anime style, a cat"
        );
        assert_eq!(apply_trigger_words("anime style cat", ["anime style"]), "anime style cat");
        assert_eq!(apply_trigger_words("a cat", [""]), "a cat");
    }

    #[test]
    fn prompt_graph_is_the_node_map() {
        let graph = flux_template();
        let prompt = graph.to_prompt();
        assert!(prompt.get("31").is_some());
        assert!(prompt.get("nodes").is_none());
    }
}
