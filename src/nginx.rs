// Generates nginx reverse proxy configuration for the hosted servers.

use crate::config::ServerConfig;
use std::path::Path;

/// Server block proxying `server_name` + `server_location` to the local server port.
pub fn render_server_block(config: &ServerConfig) -> String {
    format!(
        r#"server {{
        listen 80;
        listen 443 ssl;
        server_name {server_name};
        location {location} {{
                proxy_pass http://localhost:{port}/;
                proxy_set_header Host $http_host;
                proxy_set_header X-Real-IP $remote_addr;
                proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
                server_tokens off;
        }}
        ssl_certificate /etc/letsencrypt/live/{server_name}/fullchain.pem;
        ssl_certificate_key /etc/letsencrypt/live/{server_name}/privkey.pem;
        ssl_dhparam /etc/letsencrypt/ssl-dhparams.pem;
        include /etc/letsencrypt/options-ssl-nginx.conf;
}}"#,
        server_name = config.server_name,
        location = config.server_location,
        port = config.port,
    )
}

// All server blocks, separated by an empty line
pub fn render_nginx_config(configs: &[ServerConfig]) -> String {
    configs
        .iter()
        .map(render_server_block)
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn write_nginx_config(path: impl AsRef<Path>, configs: &[ServerConfig]) -> std::io::Result<()> {
    std::fs::write(path, render_nginx_config(configs))
}
