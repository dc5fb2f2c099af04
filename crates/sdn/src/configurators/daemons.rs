use std::time::Duration;

use async_trait::async_trait;

use super::conf::{
    DaemonFiles, dhcp_server_conf, dns_server_conf, http_proxy_conf, http_server_conf,
    radvd_args, radvd_conf,
};
use super::{Configurator, Context, item_as};
use crate::items::{ConfigItem, MAIN_NS};
use crate::os;
use crate::process::SupervisedProcess;
use crate::{Error, Result};

pub const DNSMASQ_BIN: &str = "/usr/local/sbin/dnsmasq";
pub const RADVD_BIN: &str = "/usr/sbin/radvd";
pub const HTTPSRV_BIN: &str = "/bin/httpsrv";
pub const GOPROXY_BIN: &str = "/bin/goproxy";
pub const DHCPCD_BIN: &str = "/sbin/dhcpcd";

const DNSMASQ_STOP_TIMEOUT: Duration = Duration::from_secs(30);
const RADVD_STOP_TIMEOUT: Duration = Duration::from_secs(10);
const HTTPSRV_STOP_TIMEOUT: Duration = Duration::from_secs(10);
const GOPROXY_STOP_TIMEOUT: Duration = Duration::from_secs(10);
const DHCPCD_STOP_TIMEOUT: Duration = Duration::from_secs(30);

/// Write the config file, make sure the run directory exists, then start.
async fn start_daemon(files: &DaemonFiles, conf: String, process: &SupervisedProcess) -> Result<()> {
    os::write_file(&files.conf, conf).await?;
    if let Some(run_dir) = files.pid.parent() {
        tokio::fs::create_dir_all(run_dir).await?;
    }
    process.start().await?;
    tracing::info!(binary = %process.binary, netns = %process.netns, "daemon started");
    Ok(())
}

/// Stop the daemon, then remove its files. Cleanup failures are only logged.
async fn stop_daemon(files: &DaemonFiles, process: &SupervisedProcess) -> Result<()> {
    process.stop().await?;
    os::remove_files(files.all()).await;
    tracing::info!(binary = %process.binary, netns = %process.netns, "daemon stopped");
    Ok(())
}

fn dnsmasq(netns: &str, files: &DaemonFiles) -> SupervisedProcess {
    // dnsmasq detaches itself.
    SupervisedProcess::new(DNSMASQ_BIN, netns, files.pid.clone())
        .args(["-C".to_string(), files.conf.display().to_string()])
        .stop_timeout(DNSMASQ_STOP_TIMEOUT)
}

pub struct DhcpServerConfigurator;

#[async_trait]
impl Configurator for DhcpServerConfigurator {
    async fn create(&self, item: &ConfigItem) -> Result<()> {
        let server = item_as!(item, DhcpServer);
        let files = DaemonFiles::dhcp_server(&server.server_name);
        let process = dnsmasq(&server.attachment.net_namespace, &files);
        start_daemon(&files, dhcp_server_conf(server, &files), &process).await
    }

    async fn delete(&self, item: &ConfigItem) -> Result<()> {
        let server = item_as!(item, DhcpServer);
        let files = DaemonFiles::dhcp_server(&server.server_name);
        let process = dnsmasq(&server.attachment.net_namespace, &files);
        stop_daemon(&files, &process).await
    }
}

pub struct DnsServerConfigurator;

#[async_trait]
impl Configurator for DnsServerConfigurator {
    async fn create(&self, item: &ConfigItem) -> Result<()> {
        let server = item_as!(item, DnsServer);
        let files = DaemonFiles::dns_server(&server.server_name);
        let process = dnsmasq(&server.attachment.net_namespace, &files);
        start_daemon(&files, dns_server_conf(server, &files), &process).await
    }

    async fn delete(&self, item: &ConfigItem) -> Result<()> {
        let server = item_as!(item, DnsServer);
        let files = DaemonFiles::dns_server(&server.server_name);
        let process = dnsmasq(&server.attachment.net_namespace, &files);
        stop_daemon(&files, &process).await
    }
}

pub struct RadvdConfigurator;

impl RadvdConfigurator {
    fn process(netns: &str, files: &DaemonFiles) -> SupervisedProcess {
        SupervisedProcess::new(RADVD_BIN, netns, files.pid.clone())
            .args(radvd_args(files))
            .stop_timeout(RADVD_STOP_TIMEOUT)
    }
}

#[async_trait]
impl Configurator for RadvdConfigurator {
    async fn create(&self, item: &ConfigItem) -> Result<()> {
        let radvd = item_as!(item, Radvd);
        let files = DaemonFiles::radvd(&radvd.name);
        let process = Self::process(&radvd.attachment.net_namespace, &files);
        start_daemon(&files, radvd_conf(radvd), &process).await
    }

    async fn delete(&self, item: &ConfigItem) -> Result<()> {
        let radvd = item_as!(item, Radvd);
        let files = DaemonFiles::radvd(&radvd.name);
        let process = Self::process(&radvd.attachment.net_namespace, &files);
        stop_daemon(&files, &process).await
    }
}

pub struct HttpServerConfigurator;

impl HttpServerConfigurator {
    fn process(netns: &str, files: &DaemonFiles) -> SupervisedProcess {
        SupervisedProcess::new(HTTPSRV_BIN, netns, files.pid.clone())
            .args(["-c".to_string(), files.conf.display().to_string()])
            .stop_timeout(HTTPSRV_STOP_TIMEOUT)
            .background(true)
    }
}

#[async_trait]
impl Configurator for HttpServerConfigurator {
    async fn create(&self, item: &ConfigItem) -> Result<()> {
        let server = item_as!(item, HttpServer);
        let files = DaemonFiles::http_server(&server.server_name);
        let process = Self::process(&server.attachment.net_namespace, &files);
        start_daemon(&files, http_server_conf(server, &files)?, &process).await
    }

    async fn delete(&self, item: &ConfigItem) -> Result<()> {
        let server = item_as!(item, HttpServer);
        let files = DaemonFiles::http_server(&server.server_name);
        let process = Self::process(&server.attachment.net_namespace, &files);
        stop_daemon(&files, &process).await
    }
}

pub struct HttpProxyConfigurator;

impl HttpProxyConfigurator {
    fn process(netns: &str, files: &DaemonFiles) -> SupervisedProcess {
        SupervisedProcess::new(GOPROXY_BIN, netns, files.pid.clone())
            .args(["-c".to_string(), files.conf.display().to_string()])
            .stop_timeout(GOPROXY_STOP_TIMEOUT)
            .background(true)
    }
}

#[async_trait]
impl Configurator for HttpProxyConfigurator {
    async fn create(&self, item: &ConfigItem) -> Result<()> {
        let proxy = item_as!(item, HttpProxy);
        let files = DaemonFiles::http_proxy(&proxy.proxy_name);
        let process = Self::process(&proxy.attachment.net_namespace, &files);
        start_daemon(&files, http_proxy_conf(proxy, &files)?, &process).await
    }

    async fn delete(&self, item: &ConfigItem) -> Result<()> {
        let proxy = item_as!(item, HttpProxy);
        let files = DaemonFiles::http_proxy(&proxy.proxy_name);
        let process = Self::process(&proxy.attachment.net_namespace, &files);
        stop_daemon(&files, &process).await
    }
}

/// dhcpcd on the host port, in the main namespace.
pub struct DhcpClientConfigurator {
    ctx: Context,
}

impl DhcpClientConfigurator {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    fn process(if_name: &str) -> SupervisedProcess {
        SupervisedProcess::new(DHCPCD_BIN, MAIN_NS, format!("/run/dhcpcd-{if_name}.pid"))
            .stop_timeout(DHCPCD_STOP_TIMEOUT)
            .background(true)
    }
}

/// dhcpcd arguments; `-t 0` waits for a lease forever.
pub fn dhcpcd_args(log_file: &str, if_name: &str) -> Vec<String> {
    let mut args = Vec::new();
    if !log_file.is_empty() {
        args.extend(["-j".to_string(), log_file.to_string()]);
    }
    args.extend(["-t".to_string(), "0".to_string(), if_name.to_string()]);
    args
}

#[async_trait]
impl Configurator for DhcpClientConfigurator {
    async fn create(&self, item: &ConfigItem) -> Result<()> {
        let client = item_as!(item, DhcpClient);
        let if_name = self.ctx.netif(&client.phys_if.mac)?.if_name;
        let process = Self::process(&if_name).args(dhcpcd_args(&client.log_file, &if_name));
        if process.is_running() {
            return Err(Error::AlreadyRunning(format!("dhcpcd for interface {if_name}")));
        }
        process.start().await
    }

    /// Release the lease, falling back to `--exit` when dhcpcd does not go away.
    async fn delete(&self, item: &ConfigItem) -> Result<()> {
        let client = item_as!(item, DhcpClient);
        let if_name = self.ctx.netif(&client.phys_if.mac)?.if_name;
        let process = Self::process(&if_name);

        if let Err(e) = self
            .ctx
            .runner
            .run(MAIN_NS, DHCPCD_BIN, ["--release", if_name.as_str()])
            .await
        {
            tracing::error!(interface = %if_name, error = %e, "dhcpcd release failed");
        }
        match process.wait_stopped().await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_timeout() => {
                tracing::error!(interface = %if_name, "dhcpcd still running, exiting it");
            }
            Err(e) => return Err(e),
        }
        self.ctx
            .runner
            .run(MAIN_NS, DHCPCD_BIN, ["--exit", if_name.as_str()])
            .await?;
        if process.is_running() {
            return Err(Error::Timeout {
                what: format!("exit of dhcpcd on {if_name}"),
                after: DHCPCD_STOP_TIMEOUT,
            });
        }
        Ok(())
    }
}
