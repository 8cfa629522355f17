//! [`MailStore`] over a live IMAP session
//!
//! Connects with STARTTLS, logs in, and keeps the session (and the
//! currently selected mailbox) for the lifetime of the store.

use super::{
    BodyPartData, FetchIds, FetchQuery, FetchResult, MailStore, MailboxStatus, SearchQuery,
    SearchResult, StoreRequest, UidSet, sequence_set,
};
use crate::config::ImapConfig;
use crate::envelope::{Address, Envelope};
use crate::error::StoreError;
use crate::flag::Flag;
use crate::headers::{decode_words, parse_date};
use crate::mailbox::Mailbox;
use crate::mime::{MimePart, TransferEncoding};
use async_imap::Session;
use async_imap::types::Fetch;
use futures::TryStreamExt;
use imap_proto::types::{
    BodyContentCommon, BodyContentSinglePart, BodyStructure, ContentEncoding, SectionPath,
};
use rustls::pki_types::ServerName;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};
use tracing::{debug, info, warn};

/// A TLS-wrapped IMAP session.
type ImapSession = Session<Compat<tokio_rustls::client::TlsStream<TcpStream>>>;

pub struct ImapStore {
    session: ImapSession,
    condstore: bool,
    selected: Option<Mailbox>,
}

impl ImapStore {
    /// Open a fresh TLS-wrapped IMAP session.
    ///
    /// Connects to `config.host:config.port` via TCP, issues STARTTLS,
    /// performs the TLS handshake, logs in and records whether the
    /// server advertises CONDSTORE.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if any step of the connection fails.
    pub async fn connect(config: &ImapConfig) -> Result<Self, StoreError> {
        let addr = format!("{}:{}", config.host, config.port);
        debug!("Connecting to IMAP server at {}", addr);

        let tcp_stream = TcpStream::connect(&addr).await?;
        let mut client = async_imap::Client::new(tcp_stream.compat());

        client
            .run_command_and_check_ok("STARTTLS", None)
            .await
            .map_err(|e| StoreError::Tls(format!("STARTTLS failed: {e}")))?;

        let connector = tls_connector(config.accept_invalid_certs)?;
        let server_name = ServerName::try_from(config.host.clone())
            .map_err(|e| StoreError::Tls(format!("Invalid server name: {e}")))?;

        let inner = client.into_inner().into_inner();
        let tls_stream = connector
            .connect(server_name, inner)
            .await
            .map_err(|e| StoreError::Tls(e.to_string()))?;

        let tls_client = async_imap::Client::new(tls_stream.compat());

        let mut session = tls_client
            .login(&config.username, &config.password)
            .await
            .map_err(|(e, _)| StoreError::Auth(format!("Login failed: {e}")))?;

        let condstore = session
            .capabilities()
            .await
            .map_err(|e| protocol("CAPABILITY", e))?
            .has_str("CONDSTORE");

        info!("Connected to IMAP server (CONDSTORE: {})", condstore);
        Ok(Self {
            session,
            condstore,
            selected: None,
        })
    }

    /// Log out and drop the session.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the server rejects LOGOUT.
    pub async fn logout(mut self) -> Result<(), StoreError> {
        self.session
            .logout()
            .await
            .map_err(|e| protocol("LOGOUT", e))
    }

    async fn select(&mut self, mailbox: &Mailbox) -> Result<(), StoreError> {
        if self.selected.as_ref() == Some(mailbox) {
            return Ok(());
        }
        let name = mailbox.as_str();
        let result = if self.condstore {
            self.session.select_condstore(name).await
        } else {
            self.session.select(name).await
        };
        result.map_err(|e| mailbox_error(mailbox, e))?;
        self.selected = Some(mailbox.clone());
        Ok(())
    }
}

impl MailStore for ImapStore {
    async fn status(&mut self, mailbox: &Mailbox) -> Result<MailboxStatus, StoreError> {
        let items = if self.condstore {
            "(MESSAGES UIDNEXT UIDVALIDITY HIGHESTMODSEQ)"
        } else {
            "(MESSAGES UIDNEXT UIDVALIDITY)"
        };
        let status = self
            .session
            .status(mailbox.as_str(), items)
            .await
            .map_err(|e| mailbox_error(mailbox, e))?;
        Ok(MailboxStatus {
            messages: status.exists,
            uid_next: status.uid_next.unwrap_or_default(),
            highest_mod_seq: status.highest_modseq.unwrap_or_default(),
            uid_validity: status.uid_validity.unwrap_or_default(),
        })
    }

    async fn search(
        &mut self,
        mailbox: &Mailbox,
        query: &SearchQuery,
    ) -> Result<SearchResult, StoreError> {
        if query.matches_nothing() {
            return Ok(SearchResult::default());
        }
        self.select(mailbox).await?;
        let criteria = query.to_imap();
        debug!("UID SEARCH {} in {}", criteria, mailbox);
        let matched = self
            .session
            .uid_search(&criteria)
            .await
            .map_err(|e| mailbox_error(mailbox, e))?;
        Ok(SearchResult {
            matched: matched.into_iter().collect(),
        })
    }

    async fn fetch(
        &mut self,
        mailbox: &Mailbox,
        query: &FetchQuery,
    ) -> Result<BTreeMap<u32, FetchResult>, StoreError> {
        let set = match &query.ids {
            FetchIds::All => "1:*".to_string(),
            FetchIds::Uids(uids) if uids.is_empty() => return Ok(BTreeMap::new()),
            FetchIds::Uids(uids) => sequence_set(uids),
        };
        self.select(mailbox).await?;

        let items = query.to_imap();
        debug!("UID FETCH {} {} in {}", set, items, mailbox);
        let fetches: Vec<Fetch> = self
            .session
            .uid_fetch(&set, &items)
            .await
            .map_err(|e| mailbox_error(mailbox, e))?
            .try_collect()
            .await
            .map_err(|e| protocol("FETCH", e))?;

        let mut results = BTreeMap::new();
        for fetch in &fetches {
            let Some(uid) = fetch.uid else {
                warn!("FETCH response without UID, skipping");
                continue;
            };
            results.insert(uid, convert_fetch(uid, fetch, query));
        }
        Ok(results)
    }

    async fn vanished(
        &mut self,
        mailbox: &Mailbox,
        since_modseq: u64,
        uids: &UidSet,
    ) -> Result<UidSet, StoreError> {
        // No QRESYNC: whatever a UID search no longer returns has gone.
        debug!(
            "Checking {} known UIDs in {} for expunges since {}",
            uids.len(),
            mailbox,
            since_modseq
        );
        let present = self
            .search(mailbox, &SearchQuery::all().within(uids.clone()))
            .await?
            .matched;
        Ok(uids.difference(&present).copied().collect())
    }

    async fn store(&mut self, mailbox: &Mailbox, request: &StoreRequest) -> Result<(), StoreError> {
        if request.uids.is_empty() {
            return Ok(());
        }
        self.select(mailbox).await?;
        let set = sequence_set(&request.uids);
        for command in request.to_imap() {
            debug!("UID STORE {} {} in {}", set, command, mailbox);
            let _: Vec<Fetch> = self
                .session
                .uid_store(&set, &command)
                .await
                .map_err(|e| mailbox_error(mailbox, e))?
                .try_collect()
                .await
                .map_err(|e| protocol("STORE", e))?;
        }
        Ok(())
    }
}

fn convert_fetch(uid: u32, fetch: &Fetch, query: &FetchQuery) -> FetchResult {
    let mut result = FetchResult {
        uid,
        flags: fetch.flags().filter_map(convert_flag).collect(),
        modseq: fetch.modseq,
        structure: fetch
            .bodystructure()
            .map(|bs| convert_structure(bs).numbered()),
        envelope: fetch.envelope().map(convert_envelope),
        header_text: fetch.header().map(<[u8]>::to_vec),
        full: fetch.body().map(<[u8]>::to_vec),
        ..FetchResult::default()
    };
    for mime_id in &query.body_parts {
        let Some(path) = section_path(mime_id) else {
            continue;
        };
        if let Some(data) = fetch.section(&path) {
            result.body_parts.insert(
                mime_id.clone(),
                BodyPartData {
                    data: data.to_vec(),
                    decoded: false,
                },
            );
        }
    }
    result
}

fn convert_flag(flag: async_imap::types::Flag<'_>) -> Option<Flag> {
    use async_imap::types::Flag as F;
    Some(match flag {
        F::Seen => Flag::Seen,
        F::Answered => Flag::Answered,
        F::Flagged => Flag::Flagged,
        F::Deleted => Flag::Deleted,
        F::Draft => Flag::Draft,
        F::Recent => Flag::Recent,
        F::Custom(name) => Flag::from(name.as_ref()),
        _ => return None,
    })
}

fn section_path(mime_id: &str) -> Option<SectionPath> {
    let parts = mime_id
        .split('.')
        .map(str::parse)
        .collect::<Result<Vec<u32>, _>>()
        .ok()?;
    Some(SectionPath::Part(parts, None))
}

fn convert_structure(bs: &BodyStructure<'_>) -> MimePart {
    match bs {
        BodyStructure::Basic { common, other, .. } | BodyStructure::Text { common, other, .. } => {
            single_part(common, other)
        }
        BodyStructure::Message {
            common,
            other,
            body,
            ..
        } => {
            let mut part = single_part(common, other);
            part.parts = vec![convert_structure(body)];
            part
        }
        BodyStructure::Multipart { common, bodies, .. } => {
            let mut part = MimePart::multipart(
                &common.ty.subtype,
                bodies.iter().map(convert_structure).collect(),
            );
            part.params = params(common.ty.params.as_ref());
            apply_disposition(&mut part, common);
            part
        }
    }
}

fn single_part(common: &BodyContentCommon<'_>, other: &BodyContentSinglePart<'_>) -> MimePart {
    let mut part = MimePart::leaf(&common.ty.ty, &common.ty.subtype)
        .with_encoding(convert_encoding(&other.transfer_encoding))
        .with_size(u64::from(other.octets));
    part.params = params(common.ty.params.as_ref());
    part.content_id = other.id.as_ref().map(|id| id.trim_matches(['<', '>']).to_string());
    part.description = other.description.as_ref().map(|d| decode_words(d));
    apply_disposition(&mut part, common);
    part
}

fn apply_disposition(part: &mut MimePart, common: &BodyContentCommon<'_>) {
    if let Some(disposition) = &common.disposition {
        part.disposition = Some(disposition.ty.to_ascii_lowercase());
        part.disposition_params = params(disposition.params.as_ref());
    }
}

fn params(list: Option<&Vec<(Cow<'_, str>, Cow<'_, str>)>>) -> BTreeMap<String, String> {
    list.map(|pairs| {
        pairs
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), decode_words(v)))
            .collect()
    })
    .unwrap_or_default()
}

fn convert_encoding(enc: &ContentEncoding<'_>) -> TransferEncoding {
    match enc {
        ContentEncoding::SevenBit => TransferEncoding::SevenBit,
        ContentEncoding::EightBit => TransferEncoding::EightBit,
        ContentEncoding::Binary => TransferEncoding::Binary,
        ContentEncoding::Base64 => TransferEncoding::Base64,
        ContentEncoding::QuotedPrintable => TransferEncoding::QuotedPrintable,
        ContentEncoding::Other(s) => TransferEncoding::parse(s),
    }
}

fn convert_envelope(env: &imap_proto::types::Envelope<'_>) -> Envelope {
    let text = |v: &Option<Cow<'_, [u8]>>| {
        v.as_ref()
            .map(|b| decode_words(&String::from_utf8_lossy(b)))
    };
    Envelope {
        date: text(&env.date).and_then(|d| parse_date(&d)),
        subject: text(&env.subject),
        from: addresses(env.from.as_ref()),
        sender: addresses(env.sender.as_ref()),
        reply_to: addresses(env.reply_to.as_ref()),
        to: addresses(env.to.as_ref()),
        cc: addresses(env.cc.as_ref()),
        bcc: addresses(env.bcc.as_ref()),
        in_reply_to: text(&env.in_reply_to),
        message_id: text(&env.message_id),
    }
}

fn addresses(list: Option<&Vec<imap_proto::types::Address<'_>>>) -> Vec<Address> {
    let lossy = |v: &Option<Cow<'_, [u8]>>| {
        v.as_ref()
            .map(|b| String::from_utf8_lossy(b).to_string())
    };
    list.map(|addrs| {
        addrs
            .iter()
            // Group syntax markers carry no host.
            .filter(|a| a.host.is_some())
            .map(|a| Address {
                name: lossy(&a.name).map(|n| decode_words(&n)),
                mailbox: lossy(&a.mailbox).unwrap_or_default(),
                host: lossy(&a.host).unwrap_or_default(),
            })
            .collect()
    })
    .unwrap_or_default()
}

fn mailbox_error(mailbox: &Mailbox, err: async_imap::error::Error) -> StoreError {
    match err {
        async_imap::error::Error::No(msg) if is_missing_mailbox(&msg) => {
            StoreError::NoSuchMailbox(mailbox.to_string())
        }
        async_imap::error::Error::Io(e) => StoreError::Io(e),
        other => StoreError::Protocol(format!("{mailbox}: {other}")),
    }
}

fn is_missing_mailbox(msg: &str) -> bool {
    let msg = msg.to_ascii_lowercase();
    msg.contains("nonexistent") || msg.contains("exist") || msg.contains("unknown mailbox")
}

fn protocol(op: &str, err: async_imap::error::Error) -> StoreError {
    StoreError::Protocol(format!("{op} failed: {err}"))
}

fn tls_connector(accept_invalid_certs: bool) -> Result<TlsConnector, StoreError> {
    let config = if accept_invalid_certs {
        rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(DangerousVerifier))
            .with_no_client_auth()
    } else {
        let mut roots = rustls::RootCertStore::empty();
        let certs = rustls_native_certs::load_native_certs()
            .map_err(|e| StoreError::Tls(format!("Loading native roots failed: {e}")))?;
        let (added, ignored) = roots.add_parsable_certificates(certs);
        debug!("Loaded {} native roots ({} ignored)", added, ignored);
        rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth()
    };
    Ok(TlsConnector::from(Arc::new(config)))
}

/// Certificate verifier that accepts all certificates
/// (self-signed bridges and test servers).
#[derive(Debug)]
struct DangerousVerifier;

impl rustls::client::danger::ServerCertVerifier for DangerousVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}
