use super::{Form, FormFile};
use anyhow::Context;
use bytes::Bytes;
use std::convert::Infallible;

const URL_ENCODED: &str = "application/x-www-form-urlencoded";
const MULTIPART: &str = "multipart/form-data";

pub(crate) fn parse(content_type: Option<&str>, body: &[u8]) -> anyhow::Result<Form> {
    let Some(content_type) = content_type else {
        return Ok(Form::new());
    };
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    match essence.as_str() {
        URL_ENCODED => parse_url_encoded(body),
        MULTIPART => parse_multipart(content_type, body),
        _ => Ok(Form::new()),
    }
}

fn parse_url_encoded(body: &[u8]) -> anyhow::Result<Form> {
    let pairs: Vec<(String, String)> =
        serde_urlencoded::from_bytes(body).context("malformed url-encoded form body")?;

    let mut form = Form::new();
    for (name, value) in pairs {
        form.add_value(name, value);
    }
    Ok(form)
}

fn parse_multipart(content_type: &str, body: &[u8]) -> anyhow::Result<Form> {
    let boundary = multer::parse_boundary(content_type).context("missing multipart boundary")?;
    let body = Bytes::copy_from_slice(body);
    let stream = futures::stream::once(async move { Ok::<_, Infallible>(body) });
    let mut multipart = multer::Multipart::new(stream, boundary);

    // Runs on the request worker, which may block.
    futures::executor::block_on(async move {
        let mut form = Form::new();
        while let Some(field) = multipart
            .next_field()
            .await
            .context("malformed multipart form body")?
        {
            let Some(name) = field.name().map(str::to_owned) else {
                continue;
            };
            let file_name = field.file_name().map(str::to_owned);
            let content_type = field.content_type().map(ToString::to_string);
            let content = field
                .bytes()
                .await
                .with_context(|| format!("malformed multipart field `{name}`"))?;

            if file_name.is_some() {
                form.add_file(FormFile {
                    name,
                    file_name,
                    content_type,
                    content,
                });
            } else {
                form.add_value(name, String::from_utf8_lossy(&content).into_owned());
            }
        }
        Ok(form)
    })
}
