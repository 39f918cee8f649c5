use std::time::Duration;

use tera::{Context, Tera};

use crate::cmd::Invocation;
use crate::error::{DeployError, DeployResult};
use crate::proxy::{ProxyControl, ProxyRule};

const SITE_TEMPLATE: &str = r#"# Managed by n8n-deploy. Local edits are overwritten on the next install.
map $http_upgrade $n8n_connection_upgrade {
    default upgrade;
    ''      close;
}
{% if tls %}
server {
    listen 80;
    listen [::]:80;
    server_name {{ domain }};

{% include "acme" %}
    location / {
        return 301 https://$host$request_uri;
    }
}

server {
    listen 443 ssl;
    listen [::]:443 ssl;
    server_name {{ domain }};

    ssl_certificate {{ tls.certificate }};
    ssl_certificate_key {{ tls.private_key }};
    ssl_protocols TLSv1.2 TLSv1.3;
    ssl_session_cache shared:n8n_tls:10m;

{% include "proxy" %}}
{% else %}
server {
    listen 80;
    listen [::]:80;
    server_name {{ domain }};

{% include "proxy" %}}
{% endif %}"#;

const ACME_TEMPLATE: &str = r#"    location ^~ /.well-known/acme-challenge/ {
        root {{ acme_webroot }};
        default_type "text/plain";
    }
"#;

const PROXY_TEMPLATE: &str = r#"    client_max_body_size {{ max_body_size_mb }}m;

{% include "acme" %}
    location / {
        proxy_pass http://{{ upstream }};
        proxy_http_version 1.1;
        proxy_set_header Upgrade $http_upgrade;
        proxy_set_header Connection $n8n_connection_upgrade;
        proxy_set_header Host $host;
        proxy_set_header X-Real-IP $remote_addr;
        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
        proxy_set_header X-Forwarded-Proto $scheme;
        proxy_buffering off;
        proxy_read_timeout {{ read_timeout_secs }}s;
        proxy_send_timeout {{ read_timeout_secs }}s;
    }
"#;

/// Render the nginx site file for `rule`.
pub fn render(rule: &ProxyRule) -> DeployResult<String> {
    rule.validate()?;

    let mut tera = Tera::default();
    tera.add_raw_templates(vec![
        ("acme", ACME_TEMPLATE),
        ("proxy", PROXY_TEMPLATE),
        ("site", SITE_TEMPLATE),
    ])?;
    let context = Context::from_serialize(rule)?;
    Ok(tera.render("site", &context)?)
}

/// The system nginx, driven through its CLI.
#[derive(Debug, Default)]
pub struct Nginx;

impl Nginx {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl ProxyControl for Nginx {
    fn validate(&self) -> DeployResult<()> {
        let output = Invocation::new("nginx")
            .arg("-t")
            .timeout(Duration::from_secs(30))
            .output()?;
        if output.status.success() {
            Ok(())
        } else {
            Err(DeployError::InvalidProxyConfig(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }

    fn reload(&self) -> DeployResult<()> {
        // SIGHUP: new workers pick up the config, old workers finish
        // their in-flight requests.
        Invocation::new("nginx")
            .args(["-s", "reload"])
            .timeout(Duration::from_secs(30))
            .run()?;
        Ok(())
    }
}
