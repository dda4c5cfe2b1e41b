// Stream and consumer state driven by the server task.
//
// Every entry point takes `now` explicitly and returns the messages to publish
// instead of publishing them, so the delivery rules can be tested without a
// transport or a clock.
use bytes::Bytes;
use serde::Serialize;
use sluice_transport::{InboundMessage, OutboundMessage};
use sluice_wire::api::DEFAULT_MAX_WAITING;
use sluice_wire::status::{
    DESC_CONSUMER_DELETED, DESC_MAX_BYTES, DESC_MAX_REQUEST_BATCH, DESC_MAX_WAITING,
};
use sluice_wire::{
    AckKind, AckPolicy, ApiError, ApiResponse, ConsumerConfig, ConsumerInfo,
    CreateConsumerRequest, DeleteResponse, DeliverPolicy, Headers, MessageInfo, PubAck,
    PullRequest, SUBJECT_HEADER, SequenceInfo, StatusFrame, StreamConfig, StreamInfo, StreamState,
    subjects, validate_name,
};
use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, trace, warn};

/// Which subscription an inbound message arrived on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Route {
    Api,
    Ack,
    Stream(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Effect {
    Publish(OutboundMessage),
    /// Start capturing `subject` into `stream`.
    Listen { stream: String, subject: String },
}

type Effects = Vec<Effect>;

/// A message as received on one of the server's subscriptions.
#[derive(Debug, Clone)]
pub(crate) struct Incoming {
    pub(crate) subject: String,
    pub(crate) reply: Option<String>,
    pub(crate) headers: Option<Headers>,
    pub(crate) payload: Bytes,
}

impl From<InboundMessage> for Incoming {
    fn from(message: InboundMessage) -> Self {
        Self {
            subject: message.subject,
            reply: message.reply,
            headers: message.headers,
            payload: message.payload,
        }
    }
}

#[derive(Debug)]
struct StoredMessage {
    subject: String,
    headers: Option<Headers>,
    payload: Bytes,
    timestamp_ns: u64,
}

#[derive(Debug)]
struct StreamEntry {
    config: StreamConfig,
    messages: BTreeMap<u64, StoredMessage>,
    last_seq: u64,
    bytes: u64,
    consumers: BTreeMap<String, ConsumerState>,
}

#[derive(Debug)]
struct ConsumerState {
    name: String,
    config: ConsumerConfig,
    // Next stream sequence never delivered to this consumer.
    next_seq: u64,
    delivered: SequenceInfo,
    pending: BTreeMap<u64, PendingDelivery>,
    waiting: VecDeque<WaitingRequest>,
}

#[derive(Debug)]
struct PendingDelivery {
    consumer_seq: u64,
    deliveries: u64,
    ack_deadline: Instant,
    // Set once the message is due for redelivery.
    redeliver_at: Option<Instant>,
}

#[derive(Debug)]
struct WaitingRequest {
    reply: String,
    remaining: usize,
    sent: usize,
    max_bytes: Option<usize>,
    bytes_sent: usize,
    expires_at: Option<Instant>,
    heartbeat: Option<Duration>,
    next_heartbeat: Option<Instant>,
    no_wait: bool,
}

#[derive(Debug)]
pub(crate) struct StreamStore {
    api_prefix: String,
    streams: BTreeMap<String, StreamEntry>,
}

impl StreamStore {
    pub(crate) fn new(api_prefix: impl Into<String>) -> Self {
        Self {
            api_prefix: api_prefix.into(),
            streams: BTreeMap::new(),
        }
    }

    pub(crate) fn handle(&mut self, route: Route, message: Incoming, now: Instant) -> Effects {
        let mut out = Effects::new();
        match route {
            Route::Api => self.api(
                &message.subject,
                message.reply.as_deref(),
                &message.payload,
                now,
                &mut out,
            ),
            Route::Ack => self.ack(&message.subject, &message.payload, now, &mut out),
            Route::Stream(stream) => self.store(&stream, message, now, &mut out),
        }
        out
    }

    /// Periodic work: ack-wait redelivery, request expiry, idle heartbeats.
    pub(crate) fn tick(&mut self, now: Instant) -> Effects {
        let mut out = Effects::new();
        for (stream_name, stream) in &mut self.streams {
            let StreamEntry {
                messages,
                last_seq,
                consumers,
                ..
            } = stream;
            for consumer in consumers.values_mut() {
                for pending in consumer.pending.values_mut() {
                    if pending.redeliver_at.is_none() && pending.ack_deadline <= now {
                        pending.redeliver_at = Some(now);
                    }
                }
                consumer.fulfil(stream_name, messages, *last_seq, now, &mut out);
                consumer.expire(now, &mut out);
                consumer.heartbeat(now, &mut out);
            }
        }
        out
    }

    fn api(
        &mut self,
        subject: &str,
        reply: Option<&str>,
        payload: &[u8],
        now: Instant,
        out: &mut Effects,
    ) {
        let Some(rest) = subject
            .strip_prefix(self.api_prefix.as_str())
            .and_then(|rest| rest.strip_prefix('.'))
        else {
            return;
        };
        let tokens: Vec<&str> = rest.split('.').collect();
        match tokens.as_slice() {
            ["STREAM", "CREATE", stream] => {
                let result = self.create_stream(stream, payload, out);
                respond(out, reply, result);
            }
            ["STREAM", "INFO", stream] => {
                let result = self.stream_info(stream);
                respond(out, reply, result);
            }
            ["CONSUMER", "CREATE", stream] => {
                let result = self.create_consumer(stream, None, payload);
                respond(out, reply, result);
            }
            ["CONSUMER", "DURABLE", "CREATE", stream, durable] => {
                let result = self.create_consumer(stream, Some(*durable), payload);
                respond(out, reply, result);
            }
            ["CONSUMER", "INFO", stream, consumer] => {
                let result = self.consumer_info(stream, consumer);
                respond(out, reply, result);
            }
            ["CONSUMER", "DELETE", stream, consumer] => {
                let result = self.delete_consumer(stream, consumer, out);
                respond(out, reply, result);
            }
            ["CONSUMER", "MSG", "NEXT", stream, consumer] => {
                self.pull(stream, consumer, reply, payload, now, out);
            }
            _ => {
                debug!(subject, "unknown api subject");
                respond::<DeleteResponse>(
                    out,
                    reply,
                    Err(ApiError::bad_request(format!("unknown api subject {subject}"))),
                );
            }
        }
    }

    fn create_stream(
        &mut self,
        name: &str,
        payload: &[u8],
        out: &mut Effects,
    ) -> Result<StreamInfo, ApiError> {
        let config: StreamConfig = decode_body(payload)?;
        if config.name != name {
            return Err(ApiError::bad_request("stream name in subject does not match body"));
        }
        validate_name(name).map_err(|err| ApiError::bad_request(err.to_string()))?;
        if let Some(existing) = self.streams.get(name) {
            if existing.config == config {
                return Ok(existing.info());
            }
            return Err(ApiError {
                code: 400,
                err_code: ApiError::STREAM_NAME_IN_USE,
                description: "stream name already in use with a different configuration"
                    .to_string(),
            });
        }
        let subjects = config.effective_subjects();
        let overlaps = self.streams.values().any(|stream| {
            stream
                .config
                .effective_subjects()
                .iter()
                .any(|taken| subjects.contains(taken))
        });
        if overlaps {
            return Err(ApiError::bad_request("subjects overlap with an existing stream"));
        }
        for subject in &subjects {
            out.push(Effect::Listen {
                stream: name.to_string(),
                subject: subject.clone(),
            });
        }
        debug!(stream = name, ?subjects, "stream created");
        let entry = StreamEntry {
            config,
            messages: BTreeMap::new(),
            last_seq: 0,
            bytes: 0,
            consumers: BTreeMap::new(),
        };
        let info = entry.info();
        self.streams.insert(name.to_string(), entry);
        Ok(info)
    }

    fn stream_info(&self, name: &str) -> Result<StreamInfo, ApiError> {
        self.streams
            .get(name)
            .map(StreamEntry::info)
            .ok_or_else(stream_not_found)
    }

    fn create_consumer(
        &mut self,
        stream_name: &str,
        durable: Option<&str>,
        payload: &[u8],
    ) -> Result<ConsumerInfo, ApiError> {
        let request: CreateConsumerRequest = decode_body(payload)?;
        if request.stream_name != stream_name {
            return Err(ApiError::bad_request("stream name in subject does not match body"));
        }
        let mut config = request.config;
        if durable.is_some() && config.durable_name.as_deref() != durable {
            return Err(ApiError::bad_request("durable name in subject does not match body"));
        }
        if config.deliver_policy == DeliverPolicy::ByStartSequence && config.opt_start_seq.is_none()
        {
            return Err(ApiError::bad_request("by_start_sequence requires opt_start_seq"));
        }
        if config.max_waiting == 0 {
            config.max_waiting = DEFAULT_MAX_WAITING;
        }
        let name = match config.durable_name.clone().or_else(|| config.name.clone()) {
            Some(name) => name,
            None => uuid::Uuid::new_v4().simple().to_string(),
        };
        validate_name(&name).map_err(|err| ApiError::bad_request(err.to_string()))?;
        let stream = self
            .streams
            .get_mut(stream_name)
            .ok_or_else(stream_not_found)?;
        if let Some(existing) = stream.consumers.get(&name) {
            if existing.config == config {
                return Ok(existing.info(stream_name, &stream.messages));
            }
            return Err(ApiError::bad_request(
                "consumer already exists with a different configuration",
            ));
        }
        let next_seq = match config.deliver_policy {
            DeliverPolicy::All => stream.messages.keys().next().copied().unwrap_or(1),
            DeliverPolicy::Last => stream.last_seq.max(1),
            DeliverPolicy::New => stream.last_seq + 1,
            DeliverPolicy::ByStartSequence => config.opt_start_seq.unwrap_or(1).max(1),
        };
        debug!(stream = stream_name, consumer = %name, next_seq, "consumer created");
        let consumer = ConsumerState {
            name: name.clone(),
            config,
            next_seq,
            delivered: SequenceInfo::default(),
            pending: BTreeMap::new(),
            waiting: VecDeque::new(),
        };
        let info = consumer.info(stream_name, &stream.messages);
        stream.consumers.insert(name, consumer);
        Ok(info)
    }

    fn consumer_info(&self, stream_name: &str, name: &str) -> Result<ConsumerInfo, ApiError> {
        let stream = self.streams.get(stream_name).ok_or_else(stream_not_found)?;
        let consumer = stream.consumers.get(name).ok_or_else(consumer_not_found)?;
        Ok(consumer.info(stream_name, &stream.messages))
    }

    fn delete_consumer(
        &mut self,
        stream_name: &str,
        name: &str,
        out: &mut Effects,
    ) -> Result<DeleteResponse, ApiError> {
        let stream = self
            .streams
            .get_mut(stream_name)
            .ok_or_else(stream_not_found)?;
        let consumer = stream.consumers.remove(name).ok_or_else(consumer_not_found)?;
        for request in &consumer.waiting {
            out.push(status(
                &request.reply,
                &StatusFrame::conflict(DESC_CONSUMER_DELETED),
            ));
        }
        debug!(
            stream = stream_name,
            consumer = name,
            waiting = consumer.waiting.len(),
            "consumer deleted"
        );
        Ok(DeleteResponse { success: true })
    }

    fn pull(
        &mut self,
        stream_name: &str,
        consumer_name: &str,
        reply: Option<&str>,
        payload: &[u8],
        now: Instant,
        out: &mut Effects,
    ) {
        let Some(reply) = reply else {
            warn!(
                stream = stream_name,
                consumer = consumer_name,
                "pull request without reply subject"
            );
            return;
        };
        let request = match PullRequest::decode(payload) {
            Ok(request) => request,
            Err(err) => {
                debug!(error = %err, "malformed pull request");
                out.push(status(reply, &StatusFrame::new(400, Some("Bad Request".into()))));
                return;
            }
        };
        let Some(stream) = self.streams.get_mut(stream_name) else {
            out.push(status(reply, &StatusFrame::conflict(DESC_CONSUMER_DELETED)));
            return;
        };
        let StreamEntry {
            messages,
            last_seq,
            consumers,
            ..
        } = stream;
        let Some(consumer) = consumers.get_mut(consumer_name) else {
            out.push(status(reply, &StatusFrame::conflict(DESC_CONSUMER_DELETED)));
            return;
        };
        if let Some(rejection) = consumer.admit(&request) {
            trace!(consumer = consumer_name, code = rejection.code, "pull rejected");
            out.push(status(reply, &rejection));
            return;
        }
        let heartbeat = request.idle_heartbeat.filter(|hb| !hb.is_zero());
        consumer.waiting.push_back(WaitingRequest {
            reply: reply.to_string(),
            remaining: request.batch,
            sent: 0,
            max_bytes: request.max_bytes.filter(|max| *max > 0),
            bytes_sent: 0,
            expires_at: (!request.expires.is_zero()).then(|| now + request.expires),
            heartbeat,
            next_heartbeat: heartbeat.map(|hb| now + hb),
            no_wait: request.no_wait,
        });
        consumer.fulfil(stream_name, messages, *last_seq, now, out);
    }

    fn store(&mut self, stream_name: &str, message: Incoming, now: Instant, out: &mut Effects) {
        let Some(stream) = self.streams.get_mut(stream_name) else {
            return;
        };
        stream.last_seq += 1;
        let seq = stream.last_seq;
        stream.bytes += message.payload.len() as u64;
        stream.messages.insert(
            seq,
            StoredMessage {
                subject: message.subject,
                headers: message.headers,
                payload: message.payload,
                timestamp_ns: unix_nanos(),
            },
        );
        metrics::counter!("sluice_server_messages_stored_total").increment(1);
        trace!(stream = stream_name, seq, "message stored");
        respond(
            out,
            message.reply.as_deref(),
            Ok::<_, ApiError>(PubAck {
                stream: stream_name.to_string(),
                seq,
                duplicate: false,
            }),
        );
        let StreamEntry {
            messages,
            last_seq,
            consumers,
            ..
        } = stream;
        for consumer in consumers.values_mut() {
            consumer.fulfil(stream_name, messages, *last_seq, now, out);
        }
    }

    fn ack(&mut self, subject: &str, payload: &[u8], now: Instant, out: &mut Effects) {
        let info = match MessageInfo::from_reply_subject(subject) {
            Ok(info) => info,
            Err(err) => {
                debug!(error = %err, "ignoring ack on malformed subject");
                return;
            }
        };
        let kind = match AckKind::decode(payload) {
            Ok(kind) => kind,
            Err(err) => {
                debug!(error = %err, subject, "ignoring malformed ack");
                return;
            }
        };
        let Some(stream) = self.streams.get_mut(&info.stream) else {
            return;
        };
        let StreamEntry {
            messages,
            last_seq,
            consumers,
            ..
        } = stream;
        let Some(consumer) = consumers.get_mut(&info.consumer) else {
            return;
        };
        metrics::counter!("sluice_server_acks_total").increment(1);
        trace!(
            stream = %info.stream,
            consumer = %info.consumer,
            seq = info.stream_sequence,
            ?kind,
            "ack received"
        );
        let seq = info.stream_sequence;
        match kind {
            AckKind::Ack => {
                if consumer.config.ack_policy == AckPolicy::All {
                    consumer.pending.retain(|pending_seq, _| *pending_seq > seq);
                } else {
                    consumer.pending.remove(&seq);
                }
            }
            AckKind::Term(reason) => {
                if consumer.pending.remove(&seq).is_some() {
                    debug!(consumer = %info.consumer, seq, ?reason, "delivery terminated");
                }
            }
            AckKind::Progress => {
                let ack_wait = consumer.config.ack_wait;
                if let Some(pending) = consumer.pending.get_mut(&seq)
                    && pending.redeliver_at.is_none()
                {
                    pending.ack_deadline = now + ack_wait;
                }
            }
            AckKind::Nak(delay) => {
                if let Some(pending) = consumer.pending.get_mut(&seq) {
                    pending.redeliver_at = Some(now + delay.unwrap_or_default());
                }
                consumer.fulfil(&info.stream, messages, *last_seq, now, out);
            }
        }
    }
}

impl StreamEntry {
    fn info(&self) -> StreamInfo {
        StreamInfo {
            config: self.config.clone(),
            state: StreamState {
                messages: self.messages.len() as u64,
                bytes: self.bytes,
                first_seq: self.messages.keys().next().copied().unwrap_or(0),
                last_seq: self.last_seq,
                consumer_count: self.consumers.len(),
            },
        }
    }
}

/// What the next delivery for a consumer would be.
enum Candidate {
    Redelivery(u64),
    New(u64),
}

impl ConsumerState {
    fn info(&self, stream_name: &str, messages: &BTreeMap<u64, StoredMessage>) -> ConsumerInfo {
        let ack_floor = match self.pending.iter().next() {
            Some((seq, pending)) => SequenceInfo {
                consumer_seq: pending.consumer_seq.saturating_sub(1),
                stream_seq: seq.saturating_sub(1),
            },
            None => self.delivered,
        };
        ConsumerInfo {
            stream_name: stream_name.to_string(),
            name: self.name.clone(),
            config: self.config.clone(),
            delivered: self.delivered,
            ack_floor,
            num_ack_pending: self.pending.len(),
            num_redelivered: self
                .pending
                .values()
                .filter(|pending| pending.deliveries > 1)
                .count(),
            num_waiting: self.waiting.len(),
            num_pending: self.num_pending(messages),
        }
    }

    /// Reject requests the consumer limits forbid.
    fn admit(&self, request: &PullRequest) -> Option<StatusFrame> {
        if request.batch == 0 {
            return Some(StatusFrame::new(400, Some("Bad Request".into())));
        }
        let max_batch = self.config.max_batch;
        if max_batch > 0 && request.batch > max_batch {
            return Some(StatusFrame::conflict(format!(
                "{DESC_MAX_REQUEST_BATCH} of {max_batch}"
            )));
        }
        let max_bytes = self.config.max_bytes;
        if max_bytes > 0 && request.max_bytes.is_some_and(|requested| requested > max_bytes) {
            return Some(StatusFrame::conflict(format!(
                "Exceeded MaxRequestMaxBytes of {max_bytes}"
            )));
        }
        if self.config.max_waiting > 0 && self.waiting.len() >= self.config.max_waiting {
            return Some(StatusFrame::conflict(DESC_MAX_WAITING));
        }
        None
    }

    fn matches_filter(&self, message: &StoredMessage) -> bool {
        self.config
            .filter_subject
            .as_deref()
            .is_none_or(|filter| subjects::matches(filter, &message.subject))
    }

    fn num_pending(&self, messages: &BTreeMap<u64, StoredMessage>) -> u64 {
        messages
            .range(self.next_seq..)
            .filter(|(_, message)| self.matches_filter(message))
            .count() as u64
    }

    fn next_candidate(
        &mut self,
        messages: &BTreeMap<u64, StoredMessage>,
        last_seq: u64,
        now: Instant,
    ) -> Option<Candidate> {
        let max_deliver = self.config.max_deliver;
        loop {
            let due = self
                .pending
                .iter()
                .find(|(_, pending)| pending.is_due(now))
                .map(|(seq, pending)| (*seq, pending.deliveries));
            let Some((seq, deliveries)) = due else {
                break;
            };
            let exhausted = max_deliver > 0 && deliveries >= max_deliver as u64;
            if exhausted || !messages.contains_key(&seq) {
                debug!(consumer = %self.name, seq, deliveries, "dropping undeliverable message");
                self.pending.remove(&seq);
                continue;
            }
            return Some(Candidate::Redelivery(seq));
        }
        while self.next_seq <= last_seq {
            match messages.get(&self.next_seq) {
                Some(message) if self.matches_filter(message) => {
                    return Some(Candidate::New(self.next_seq));
                }
                _ => self.next_seq += 1,
            }
        }
        None
    }

    /// Serve waiting requests in arrival order until they are full or nothing
    /// is deliverable.
    fn fulfil(
        &mut self,
        stream_name: &str,
        messages: &BTreeMap<u64, StoredMessage>,
        last_seq: u64,
        now: Instant,
        out: &mut Effects,
    ) {
        while !self.waiting.is_empty() {
            let Some(candidate) = self.next_candidate(messages, last_seq, now) else {
                self.finish_idle_requests(out);
                return;
            };
            let seq = match candidate {
                Candidate::Redelivery(seq) | Candidate::New(seq) => seq,
            };
            let Some(message) = messages.get(&seq) else {
                return;
            };
            let size = message.payload.len();
            let Some(request) = self.waiting.front() else {
                return;
            };
            if let Some(max_bytes) = request.max_bytes
                && request.bytes_sent + size > max_bytes
            {
                out.push(status(&request.reply, &StatusFrame::conflict(DESC_MAX_BYTES)));
                self.waiting.pop_front();
                continue;
            }
            let reply = request.reply.clone();
            let (deliveries, consumer_seq) = self.record_delivery(candidate, now);
            let info = MessageInfo {
                stream: stream_name.to_string(),
                consumer: self.name.clone(),
                delivered: deliveries,
                stream_sequence: seq,
                consumer_sequence: consumer_seq,
                timestamp_ns: message.timestamp_ns,
                pending: self.num_pending(messages),
            };
            let mut headers = message.headers.clone().unwrap_or_default();
            headers.insert(SUBJECT_HEADER, message.subject.clone());
            out.push(Effect::Publish(
                OutboundMessage::new(reply, message.payload.clone())
                    .with_reply(info.reply_subject())
                    .with_headers(headers),
            ));
            metrics::counter!("sluice_server_deliveries_total").increment(1);

            if let Some(request) = self.waiting.front_mut() {
                request.remaining -= 1;
                request.sent += 1;
                request.bytes_sent += size;
                request.next_heartbeat = request.heartbeat.map(|hb| now + hb);
                if request.remaining == 0 {
                    self.waiting.pop_front();
                }
            }
        }
    }

    // A request that already got messages, or that asked not to wait, ends with
    // 404 once nothing else is deliverable.
    fn finish_idle_requests(&mut self, out: &mut Effects) {
        self.waiting.retain(|request| {
            if request.sent > 0 || request.no_wait {
                out.push(status(&request.reply, &StatusFrame::no_messages()));
                false
            } else {
                true
            }
        });
    }

    fn record_delivery(&mut self, candidate: Candidate, now: Instant) -> (u64, u64) {
        self.delivered.consumer_seq += 1;
        let consumer_seq = self.delivered.consumer_seq;
        let ack_deadline = now + self.config.ack_wait;
        match candidate {
            Candidate::Redelivery(seq) => {
                let pending = self.pending.entry(seq).or_insert(PendingDelivery {
                    consumer_seq,
                    deliveries: 0,
                    ack_deadline,
                    redeliver_at: None,
                });
                pending.consumer_seq = consumer_seq;
                pending.deliveries += 1;
                pending.ack_deadline = ack_deadline;
                pending.redeliver_at = None;
                (pending.deliveries, consumer_seq)
            }
            Candidate::New(seq) => {
                self.next_seq = seq + 1;
                self.delivered.stream_seq = seq;
                if self.config.ack_policy != AckPolicy::None {
                    self.pending.insert(
                        seq,
                        PendingDelivery {
                            consumer_seq,
                            deliveries: 1,
                            ack_deadline,
                            redeliver_at: None,
                        },
                    );
                }
                (1, consumer_seq)
            }
        }
    }

    fn expire(&mut self, now: Instant, out: &mut Effects) {
        self.waiting.retain(|request| {
            if request.expires_at.is_some_and(|at| at <= now) {
                out.push(status(&request.reply, &StatusFrame::request_timeout()));
                false
            } else {
                true
            }
        });
    }

    fn heartbeat(&mut self, now: Instant, out: &mut Effects) {
        for request in &mut self.waiting {
            if let (Some(interval), Some(at)) = (request.heartbeat, request.next_heartbeat)
                && at <= now
            {
                out.push(status(&request.reply, &StatusFrame::idle_heartbeat()));
                request.next_heartbeat = Some(now + interval);
            }
        }
    }
}

impl PendingDelivery {
    fn is_due(&self, now: Instant) -> bool {
        self.redeliver_at.is_some_and(|at| at <= now)
    }
}

fn status(reply: &str, frame: &StatusFrame) -> Effect {
    Effect::Publish(OutboundMessage::new(reply, Bytes::new()).with_headers(frame.to_headers()))
}

fn respond<T: Serialize>(out: &mut Effects, reply: Option<&str>, result: Result<T, ApiError>) {
    let Some(reply) = reply else {
        return;
    };
    match serde_json::to_vec(&ApiResponse::from(result)) {
        Ok(body) => out.push(Effect::Publish(OutboundMessage::new(reply, body))),
        Err(err) => warn!(error = %err, "failed to encode api response"),
    }
}

fn decode_body<T: serde::de::DeserializeOwned>(payload: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(payload)
        .map_err(|err| ApiError::bad_request(format!("invalid request body: {err}")))
}

fn stream_not_found() -> ApiError {
    ApiError::not_found(ApiError::STREAM_NOT_FOUND, "stream not found")
}

fn consumer_not_found() -> ApiError {
    ApiError::not_found(ApiError::CONSUMER_NOT_FOUND, "consumer not found")
}

fn unix_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}
