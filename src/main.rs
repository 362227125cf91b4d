use anyhow::{Context, Error};
use clap::Parser;
use clap_stdin::MaybeStdin;
use hvmobile::config::{DEFAULT_COUNTRY, DEFAULT_LANGUAGE};
use hvmobile::crypto;
use hvmobile::request::{Envelope, Request, DEFAULT_MSG_TTL};
use hvmobile::response::ResponseResult;
use time::OffsetDateTime;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    action: Action,
}

#[derive(Debug, clap::Subcommand)]
enum Action {
    /// Print the base64 SHA-256 digest of some text.
    Hash {
        data: MaybeStdin<String>,
        /// Wrap the digest in a <hash-data> element.
        #[arg(long)]
        wrap: bool,
    },
    /// Print the base64 HMAC-SHA-256 of some text.
    Hmac {
        /// Base64 encoded key.
        #[arg(long)]
        key: String,
        data: MaybeStdin<String>,
    },
    /// Build a request envelope and print it.
    Envelope {
        #[arg(long)]
        method: String,
        #[arg(long, default_value_t = 1.0)]
        method_version: f32,
        /// The <info> element of the call.
        info: MaybeStdin<String>,
        #[arg(long)]
        app_id: Option<String>,
        #[arg(long)]
        token: Option<String>,
        /// Base64 session shared secret; the envelope is signed when given.
        #[arg(long)]
        session_secret: Option<String>,
        #[arg(long, default_value = DEFAULT_LANGUAGE)]
        language: String,
        #[arg(long, default_value = DEFAULT_COUNTRY)]
        country: String,
        #[arg(long, default_value_t = DEFAULT_MSG_TTL)]
        ttl: u32,
    },
    /// Interpret a response document and print the result as JSON.
    ParseResponse {
        body: MaybeStdin<String>,
        #[arg(long, default_value = "Unknown")]
        method: String,
    },
}

fn main() -> Result<(), Error> {
    let output = match Args::parse().action {
        Action::Hash { data, wrap } => hash(&data.to_string(), wrap),
        Action::Hmac { key, data } => hmac(&key, &data.to_string())?,
        Action::Envelope {
            method,
            method_version,
            info,
            app_id,
            token,
            session_secret,
            language,
            country,
            ttl,
        } => {
            let request = Request::new(method, method_version, info.to_string());
            let mut envelope = Envelope::new(&request, OffsetDateTime::now_utc());
            envelope.app_id = app_id.as_deref();
            envelope.auth_token = token.as_deref();
            envelope.session_shared_secret = session_secret.as_deref();
            envelope.language = language.as_str();
            envelope.country = country.as_str();
            envelope.msg_ttl = ttl;
            envelope.to_xml().context("could not build envelope")?
        }
        Action::ParseResponse { body, method } => parse_response(&method, body.to_string())?,
    };
    println!("{output}");
    Ok(())
}

fn hash(data: &str, wrap: bool) -> String {
    if wrap {
        crypto::sha256_wrapped(data)
    } else {
        crypto::sha256_base64(data)
    }
}

fn hmac(key: &str, data: &str) -> Result<String, Error> {
    let key = crypto::decode_key(key).context("could not read key")?;
    Ok(crypto::hmac_sha256_base64(&key, data)?)
}

fn parse_response(method: &str, body: String) -> Result<String, Error> {
    let result = ResponseResult::parse(method, body);
    Ok(serde_json::to_string_pretty(&result)?)
}
