//! The coordinator between the web client and the network.
//!
//! [`Interceptor`] owns everything the encryption layer knows about the
//! session: the node store, the replayable session fields, and the
//! quarantine flag. Requests flow through [`Interceptor::fetch`]:
//!
//! ```text
//! client ──▶ on_pre_fetch ──▶ [subtree pushes] ──▶ transport ──▶ on_post_fetch ──▶ client
//!              encrypt                                            decrypt
//! ```
//!
//! Outbound, the whole request is transformed before anything is sent.
//! Every subtree decryption the request implies is confirmed with the user
//! up front; a refusal quarantines the session and nothing at all reaches
//! the server. Confirmed subtree jobs are pushed first, then the rewritten
//! request itself.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::codec::{decode_body, encode_body};
use crate::config::LockConfig;
use crate::encrypter::FieldCipher;
use crate::error::{LockError, LockResult};
use crate::host::{Host, HttpRequest, HttpResponse, Method, Transport};
use crate::protocol::{
    AuxiliaryTreeInfo, InitializationData, PushPollData, PushPollResponse, TreeDataResponse,
    TreeEntry, TreeItem,
};
use crate::reencrypt::{ReencryptFlags, SubtreeJob};
use crate::session::{SessionFields, PUSH_POLL_DATA};
use crate::store::{NodePatch, NodeStore};
use crate::transform::{transform_batch, Direction, TransformContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endpoint {
    PushAndPoll,
    TreeData,
    InitializationData,
}

pub struct Interceptor {
    config: LockConfig,
    store: NodeStore,
    session: SessionFields,
    quarantined: bool,
    cipher: Arc<dyn FieldCipher>,
    transport: Arc<dyn Transport>,
    host: Arc<dyn Host>,
}

impl Interceptor {
    pub fn new(
        config: LockConfig,
        cipher: Arc<dyn FieldCipher>,
        transport: Arc<dyn Transport>,
        host: Arc<dyn Host>,
    ) -> Self {
        let store = NodeStore::new(
            config.boundary.lock_tag.clone(),
            config.boundary.max_tree_depth,
        );
        Self {
            config,
            store,
            session: SessionFields::default(),
            quarantined: false,
            cipher,
            transport,
            host,
        }
    }

    pub fn store(&self) -> &NodeStore {
        &self.store
    }

    pub fn session(&self) -> &SessionFields {
        &self.session
    }

    pub fn is_quarantined(&self) -> bool {
        self.quarantined
    }

    /// Pretty JSON of the node store.
    pub fn tree_dump(&self) -> String {
        self.store.dump()
    }

    /// Run one client request through the pipeline.
    pub async fn fetch(&mut self, request: HttpRequest) -> LockResult<HttpResponse> {
        let request = self.on_pre_fetch(request).await?;
        let response = self.transport.send(request.clone()).await?;
        self.on_post_fetch(&request, response).await
    }

    fn endpoint(&self, request: &HttpRequest) -> Option<Endpoint> {
        let endpoints = &self.config.endpoints;
        let hits = |path: &str| request.url.contains(&format!("{}{}", endpoints.domain, path));
        match request.method {
            Method::Post if hits(&endpoints.push_and_poll) => Some(Endpoint::PushAndPoll),
            Method::Get if hits(&endpoints.tree_data) => Some(Endpoint::TreeData),
            Method::Get if hits(&endpoints.initialization_data) => Some(Endpoint::InitializationData),
            _ => None,
        }
    }

    fn ensure_open(&self) -> LockResult<()> {
        if self.quarantined {
            return Err(LockError::Quarantined);
        }
        Ok(())
    }

    fn quarantine(&mut self) {
        warn!("plaintext publication refused; session quarantined until reload");
        self.quarantined = true;
        self.host.reload();
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    /// Rewrite an outbound request. Pushes triggered by boundary transitions
    /// are sent before this returns.
    pub async fn on_pre_fetch(&mut self, mut request: HttpRequest) -> LockResult<HttpRequest> {
        self.ensure_open()?;
        if self.endpoint(&request) != Some(Endpoint::PushAndPoll) {
            return Ok(request);
        }
        let Some(raw) = request.body.as_deref() else {
            return Ok(request);
        };

        let mut body = encode_body(raw);
        self.session.observe_request(&body, &request.headers);

        let mut batches: Vec<PushPollData> = match body.get(PUSH_POLL_DATA).cloned() {
            Some(value) => match serde_json::from_value(value) {
                Ok(batches) => batches,
                Err(e) => {
                    warn!(error = %e, "push_poll_data has an unexpected shape; passing through");
                    return Ok(request);
                }
            },
            None => return Ok(request),
        };

        let mut jobs = Vec::new();
        for batch in &mut batches {
            self.session.observe_transaction(
                batch.share_id.as_deref(),
                batch.most_recent_operation_transaction_id.as_deref(),
            );
            let mut ctx = TransformContext {
                store: &mut self.store,
                cipher: self.cipher.as_ref(),
                direction: Direction::Encrypt,
                network: true,
            };
            jobs.extend(transform_batch(&mut ctx, batch).await);
        }

        if !jobs.is_empty() && !self.cipher.secret_loaded().await {
            // Without a secret every rewrite would resend the text unchanged.
            warn!(jobs = jobs.len(), "no secret loaded; boundary change not propagated");
            jobs.clear();
        }

        self.confirm_jobs(&jobs).await?;
        for job in jobs {
            self.run_job(job).await?;
        }

        body.insert(PUSH_POLL_DATA, serde_json::to_value(&batches)?);
        request.body = Some(decode_body(&body));
        Ok(request)
    }

    async fn confirm_jobs(&mut self, jobs: &[SubtreeJob]) -> LockResult<()> {
        for job in jobs.iter().filter(|job| job.needs_confirmation()) {
            if !self.host.confirm(&job.prompt()).await {
                self.quarantine();
                return Err(LockError::Quarantined);
            }
        }
        Ok(())
    }

    /// Re-encrypt (or decrypt) everything below `root` on the server.
    ///
    /// Decryption asks the user first; a refusal quarantines the session.
    pub async fn update_child_node_encryption(
        &mut self,
        root: &str,
        target: Direction,
        include_root: bool,
        flags: ReencryptFlags,
    ) -> LockResult<()> {
        if flags.no_network {
            debug!(root = %root, "no-network re-encryption skipped");
            return Ok(());
        }
        self.ensure_open()?;
        if !self.cipher.secret_loaded().await {
            warn!(root = %root, "no secret loaded; re-encryption skipped");
            return Ok(());
        }
        let job = SubtreeJob::plan(&self.store, root, target, include_root);
        self.confirm_jobs(std::slice::from_ref(&job)).await?;
        self.run_job(job).await
    }

    async fn run_job(&mut self, job: SubtreeJob) -> LockResult<()> {
        if job.edits.is_empty() {
            return Ok(());
        }
        let (root, target, count) = (job.root.clone(), job.target, job.edits.len());
        let batches = job.into_batches(self.cipher.as_ref(), &self.session).await;
        if batches.is_empty() {
            return Ok(());
        }

        let batch_count = batches.len();
        let verb = match target {
            Direction::Encrypt => "Encrypting",
            Direction::Decrypt => "Decrypting",
        };
        self.host.show_progress(&format!("{verb} {count} item(s)"));
        let result = self.push(&batches).await;
        self.host.hide_progress();
        result?;

        info!(root = %root, ?target, ops = count, batches = batch_count, "subtree rewritten on server");
        Ok(())
    }

    /// Send a push of our own and reconcile its response.
    async fn push(&mut self, batches: &[PushPollData]) -> LockResult<()> {
        let body = self.session.push_body(batches)?;
        let request = HttpRequest::post(self.config.endpoints.push_and_poll_url(), body)
            .with_headers(self.session.headers.clone());
        let response = self.transport.send(request).await?;
        if !response.is_success() {
            return Err(LockError::Transport(format!(
                "subtree push rejected with status {}",
                response.status
            )));
        }
        self.reconcile_push_response(response.body).await;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    /// Rewrite an inbound response. Anything unparseable is handed back
    /// unchanged.
    pub async fn on_post_fetch(
        &mut self,
        request: &HttpRequest,
        mut response: HttpResponse,
    ) -> LockResult<HttpResponse> {
        self.ensure_open()?;
        let Some(endpoint) = self.endpoint(request) else {
            return Ok(response);
        };
        if !response.is_success() {
            return Ok(response);
        }

        response.body = match endpoint {
            Endpoint::PushAndPoll => self.reconcile_push_response(response.body).await,
            Endpoint::TreeData => self.absorb_tree_data(response.body).await,
            Endpoint::InitializationData => self.absorb_initialization_data(response.body).await,
        };
        Ok(response)
    }

    async fn reconcile_push_response(&mut self, body: String) -> String {
        let mut parsed: PushPollResponse = match serde_json::from_str(&body) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!(error = %e, "push_and_poll response not understood");
                return body;
            }
        };

        for result in &mut parsed.results {
            self.session.observe_transaction(
                result.share_id.as_deref(),
                result.new_most_recent_operation_transaction_id.as_deref(),
            );
            if let Some(json) = result.server_run_operation_transaction_json.as_mut() {
                *json = self.decrypt_transaction(std::mem::take(json)).await;
            }
            for json in result
                .concurrent_remote_operation_transactions
                .iter_mut()
                .flatten()
            {
                *json = self.decrypt_transaction(std::mem::take(json)).await;
            }
        }

        reencode(&parsed, body)
    }

    /// Decrypt one embedded transaction and apply it to the store. Boundary
    /// transitions seen here were made elsewhere and are not resubmitted.
    async fn decrypt_transaction(&mut self, json: String) -> String {
        let mut batch: PushPollData = match serde_json::from_str(&json) {
            Ok(batch) => batch,
            Err(e) => {
                debug!(error = %e, "embedded transaction not understood");
                return json;
            }
        };
        let mut ctx = TransformContext {
            store: &mut self.store,
            cipher: self.cipher.as_ref(),
            direction: Direction::Decrypt,
            network: false,
        };
        transform_batch(&mut ctx, &mut batch).await;
        reencode(&batch, json)
    }

    async fn absorb_tree_data(&mut self, body: String) -> String {
        let mut parsed: TreeDataResponse = match serde_json::from_str(&body) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!(error = %e, "tree data not understood");
                return body;
            }
        };

        for entry in &mut parsed.items {
            match entry {
                TreeEntry::Item(item) => self.absorb_tree_item(item).await,
                TreeEntry::Group(items) => {
                    for item in items {
                        self.absorb_tree_item(item).await;
                    }
                }
            }
        }
        debug!(nodes = self.store.len(), "tree data absorbed");
        reencode(&parsed, body)
    }

    async fn absorb_tree_item(&mut self, item: &mut TreeItem) {
        decrypt_slot(self.cipher.as_ref(), &mut item.nm).await;
        decrypt_slot(self.cipher.as_ref(), &mut item.no).await;

        let patch = NodePatch {
            name: item.nm.clone().into(),
            description: item.no.clone().into(),
            ..NodePatch::default()
        }
        .parent(item.prnt.clone());
        self.store.update(&item.id, patch, false);

        // The main-tree projection of a share root: the root keeps its own
        // id and learns where it is mounted.
        if let Some(share_id) = item.alias.as_deref() {
            match self.store.find_share_root(share_id).cloned() {
                Some(root) => {
                    let mount = NodePatch::default()
                        .local_id(item.id.clone())
                        .parent(item.prnt.clone());
                    self.store.update(&root, mount, true);
                }
                None => debug!(share_id, "alias for an unknown share"),
            }
        }
    }

    async fn absorb_initialization_data(&mut self, body: String) -> String {
        let mut parsed: InitializationData = match serde_json::from_str(&body) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!(error = %e, "initialization data not understood");
                return body;
            }
        };

        let trees = &mut parsed.project_tree_data;
        if let Some(main) = &trees.main_project_tree_info {
            self.session
                .observe_transaction(None, main.initial_most_recent_operation_transaction_id.as_deref());
        }
        for info in &mut trees.auxiliary_project_tree_infos {
            self.absorb_share(info).await;
        }
        reencode(&parsed, body)
    }

    async fn absorb_share(&mut self, info: &mut AuxiliaryTreeInfo) {
        let root = &mut info.root_project;
        decrypt_slot(self.cipher.as_ref(), &mut root.nm).await;
        decrypt_slot(self.cipher.as_ref(), &mut root.no).await;

        let patch = NodePatch {
            name: root.nm.clone().into(),
            description: root.no.clone().into(),
            ..NodePatch::default()
        }
        .share_id(info.share_id.clone());
        self.store.update(&root.id, patch, false);
        self.session.observe_transaction(
            Some(&info.share_id),
            info.initial_most_recent_operation_transaction_id.as_deref(),
        );
    }
}

async fn decrypt_slot(cipher: &dyn FieldCipher, slot: &mut Option<String>) {
    if let Some(text) = slot.as_mut().filter(|t| !t.is_empty()) {
        *text = cipher.decrypt(text).await;
    }
}

/// Serialize a rewritten payload, falling back to the original text.
fn reencode<T: serde::Serialize>(value: &T, original: String) -> String {
    match serde_json::to_string(value) {
        Ok(encoded) => encoded,
        Err(e) => {
            warn!(error = %e, "failed to re-encode payload; forwarding original");
            original
        }
    }
}
