//! Phased converter pipeline

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use uuid::Uuid;
use wiretree_h2::H2Limits;

use crate::arena::ElementArena;
use crate::buffer::ContentBuffer;
use crate::connection::{CapturedChunk, ConnectionId};
use crate::converters::{FormUrlEncodedConverter, Http1Converter, Http2Converter};
use crate::element::{Charset, Element, ElementId};
use crate::error::ConversionError;
use crate::facets::ConversionErrorFacet;
use crate::metadata::{MessageMetadata, PREVIOUS_MESSAGE_ID, RECEIVER, SENDER, SEQUENCE_NUMBER, TIMESTAMP};
use crate::pairing::PairingConverter;
use crate::persisted::PersistedMessage;
use crate::{trace_debug, trace_warn};

/// Pipeline stage. Converters of an earlier phase see an element first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    /// Reassembling protocol units from raw chunks
    Framing,
    ProtocolParsing,
    ContentTypeDecoding,
    /// Cross-message work such as pairing
    Enrichment,
}

/// A pluggable decoder.
///
/// `consume_element` is called once per submitted element. Implementations
/// must check whether their result is already present and do nothing in that
/// case, so converting an element twice changes nothing.
pub trait Converter: Send + Sync {
    /// Name recorded with conversion errors
    fn name(&self) -> &'static str;

    fn phase(&self) -> Phase;

    fn consume_element(
        &self,
        element: &Arc<Element>,
        handle: &PipelineHandle<'_>,
    ) -> Result<(), ConversionError>;

    /// The capture history was dropped; forget any per-message state
    fn on_history_cleared(&self) {}

    /// `connection` will not be seen again; forget its state
    fn on_connection_closed(&self, _connection: ConnectionId) {}
}

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Nesting depth past which submitted elements are not converted
    pub max_depth:          usize,
    /// Limits applied by the built-in HTTP/2 converter
    pub h2_limits:          H2Limits,
    /// Register the HTTP/2, HTTP/1, form and pairing converters
    pub builtin_converters: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_depth:          32,
            h2_limits:          H2Limits::default(),
            builtin_converters: true,
        }
    }
}

/// Turns captured chunks and persisted messages into element trees.
///
/// Every element submitted to the pipeline is offered to all registered
/// converters in [`Phase`] order, and in registration order within a phase.
/// A converter failure (error or panic) is recorded as a
/// [`ConversionErrorFacet`] on the element and does not stop the others.
pub struct Pipeline {
    config:        PipelineConfig,
    arena:         ElementArena,
    converters:    Vec<Arc<dyn Converter>>,
    next_sequence: AtomicU64,
    /// Most recent message uuid per connection
    last_message:  DashMap<ConnectionId, Uuid>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let builtins = config.builtin_converters;
        let h2_limits = config.h2_limits.clone();
        let mut pipeline = Self {
            config,
            arena: ElementArena::new(),
            converters: Vec::new(),
            next_sequence: AtomicU64::new(0),
            last_message: DashMap::new(),
        };
        if builtins {
            pipeline.register(Http2Converter::with_limits(h2_limits));
            pipeline.register(Http1Converter);
            pipeline.register(FormUrlEncodedConverter);
            pipeline.register(PairingConverter);
        }
        pipeline
    }

    /// Add a converter after every registered converter of the same or an
    /// earlier phase
    pub fn register(&mut self, converter: impl Converter + 'static) {
        let phase = converter.phase();
        let position = self
            .converters
            .iter()
            .position(|existing| existing.phase() > phase)
            .unwrap_or(self.converters.len());
        self.converters.insert(position, Arc::new(converter));
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn arena(&self) -> &ElementArena {
        &self.arena
    }

    /// Names of the registered converters in execution order
    pub fn converter_names(&self) -> Vec<&'static str> {
        self.converters.iter().map(|c| c.name()).collect()
    }

    /// Register a captured chunk as a top-level message and convert it
    pub fn ingest(&self, chunk: CapturedChunk) -> Arc<Element> {
        let metadata = MessageMetadata::new()
            .with(SENDER, chunk.sender)
            .with(RECEIVER, chunk.receiver)
            .with(TIMESTAMP, chunk.timestamp);
        let message = self.register_message(ContentBuffer::new(chunk.bytes), None, metadata);
        self.convert(&message);
        message
    }

    /// Rebuild a persisted message under its original uuid and convert it
    pub fn restore(&self, persisted: &PersistedMessage) -> Result<Arc<Element>, ConversionError> {
        let (uuid, content, metadata) = persisted.to_parts()?;
        let message = self.register_message(content, Some(uuid), metadata);
        self.convert(&message);
        Ok(message)
    }

    /// Run every converter on `element`
    pub fn convert(&self, element: &Arc<Element>) {
        self.run(element, 0);
    }

    /// Drop every element and all per-connection state
    pub fn clear_history(&self) {
        trace_debug!("clearing capture history ({} elements)", self.arena.len());
        self.arena.clear();
        self.last_message.clear();
        for converter in &self.converters {
            converter.on_history_cleared();
        }
    }

    /// Forget per-connection state for `connection`.
    ///
    /// Already decoded messages are kept.
    pub fn evict_connection(&self, connection: ConnectionId) {
        trace_debug!("evicting connection {connection}");
        self.last_message.remove(&connection);
        for converter in &self.converters {
            converter.on_connection_closed(connection);
        }
    }

    /// Create a top-level message, filling in sequence number and previous
    /// message id unless already present
    fn register_message(
        &self,
        content: ContentBuffer,
        uuid: Option<Uuid>,
        mut metadata: MessageMetadata,
    ) -> Arc<Element> {
        match metadata.get(SEQUENCE_NUMBER) {
            Ok(Some(sequence)) => {
                self.next_sequence
                    .fetch_max(sequence.saturating_add(1), Ordering::Relaxed);
            },
            _ => {
                let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
                metadata.set(SEQUENCE_NUMBER, sequence);
            },
        }

        let uuid = uuid.unwrap_or_else(Uuid::new_v4);
        if let (Ok(Some(sender)), Ok(Some(receiver))) = (metadata.get(SENDER), metadata.get(RECEIVER))
            && let Some(previous) = self
                .last_message
                .insert(ConnectionId::new(sender, receiver), uuid)
            && metadata.get_raw(PREVIOUS_MESSAGE_ID.name()).is_none()
        {
            metadata.set(PREVIOUS_MESSAGE_ID, previous);
        }

        self.arena.create_message(content, Some(uuid), metadata)
    }

    fn run(&self, element: &Arc<Element>, depth: usize) {
        let max = self.config.max_depth;
        if depth > max {
            if has_failed(element, "pipeline") {
                return;
            }
            trace_warn!("element {} not converted: depth {depth} exceeds {max}", element.id());
            element.add_facet(ConversionErrorFacet {
                converter: "pipeline",
                error:     ConversionError::DepthExceeded { depth, max },
            });
            return;
        }

        let handle = PipelineHandle {
            pipeline: self,
            depth,
        };
        for converter in &self.converters {
            if has_failed(element, converter.name()) {
                continue;
            }
            let outcome =
                panic::catch_unwind(AssertUnwindSafe(|| converter.consume_element(element, &handle)));
            let error = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(error)) => error,
                Err(payload) => ConversionError::Panicked {
                    converter: converter.name().to_string(),
                    message:   panic_message(payload.as_ref()),
                },
            };
            trace_warn!(
                "converter {} failed on element {}: {error}",
                converter.name(),
                element.id()
            );
            element.add_facet(ConversionErrorFacet {
                converter: converter.name(),
                error,
            });
        }
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(PipelineConfig::default())
    }
}

/// A converter that failed once on an element is not retried on it
fn has_failed(element: &Element, converter: &str) -> bool {
    element
        .facets()
        .iter()
        .filter_map(crate::facet::downcast_facet::<ConversionErrorFacet>)
        .any(|facet| facet.converter == converter)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// What a converter may do while consuming an element.
pub struct PipelineHandle<'a> {
    pipeline: &'a Pipeline,
    depth:    usize,
}

impl PipelineHandle<'_> {
    pub fn arena(&self) -> &ElementArena {
        &self.pipeline.arena
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.pipeline.config
    }

    /// Nesting depth of the element being converted; 0 for top-level calls
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn create_child(
        &self,
        parent: ElementId,
        content: ContentBuffer,
    ) -> Result<Arc<Element>, ConversionError> {
        Ok(self.pipeline.arena.create_child(parent, content)?)
    }

    pub fn create_child_with_charset(
        &self,
        parent: ElementId,
        content: ContentBuffer,
        charset: Charset,
    ) -> Result<Arc<Element>, ConversionError> {
        Ok(self
            .pipeline
            .arena
            .create_child_with_charset(parent, content, charset)?)
    }

    /// Convert `element` one level deeper than the current element
    pub fn submit(&self, element: &Arc<Element>) {
        self.pipeline.run(element, self.depth + 1);
    }

    /// Register a derived top-level message.
    ///
    /// The message gets a sequence number and previous-message id like a
    /// captured one. The caller attaches its facets, then
    /// [`submit()`](Self::submit)s it.
    pub fn emit_message(&self, content: ContentBuffer, metadata: MessageMetadata) -> Arc<Element> {
        self.pipeline.register_message(content, None, metadata)
    }
}
