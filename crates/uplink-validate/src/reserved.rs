//! Reserved subdomain set
//!
//! Compiled-in, immutable. Covers infrastructure, auth, mail, network,
//! dev/staging, operations, documentation, community, commerce, content
//! delivery, analytics, API, database, mobile, legal, marketing,
//! monitoring, CI, common-use, abuse-prevention, cloud, user-facing, and
//! account-flow names that must never resolve to a user tunnel.

/// Subdomains that cannot be claimed for tunnels.
pub const RESERVED_SUBDOMAINS: &[&str] = &[
    // Core infrastructure
    "web", "app", "www", "api", "admin", "dashboard", "console",
    "portal", "control", "panel", "cp", "manage", "manager",
    // Authentication & security
    "auth", "login", "signup", "register", "account", "accounts",
    "oauth", "sso", "identity", "id", "session", "sessions",
    "security", "secure", "verify", "verification",
    // Email services
    "mail", "email", "smtp", "pop", "pop3", "imap",
    "webmail", "mta", "mx", "postmaster", "abuse",
    // Network services
    "ftp", "sftp", "ssh", "vpn", "proxy", "gateway",
    "tunnel", "tunnels", "agent", "agents", "client", "clients",
    "dns", "ns", "ns1", "ns2", "ns3", "ns4",
    // Development & testing
    "dev", "develop", "development", "staging", "stage",
    "test", "testing", "qa", "uat", "demo", "sandbox",
    "preview", "beta", "alpha", "canary", "edge",
    // Production & operations
    "prod", "production", "live", "internal", "private",
    "ops", "devops", "sre", "infrastructure", "infra",
    // Documentation & support
    "docs", "documentation", "wiki", "help", "support",
    "helpdesk", "faq", "guide", "guides", "tutorial", "tutorials",
    "kb", "knowledgebase", "learn", "learning",
    // Community & social
    "blog", "news", "forum", "forums", "community",
    "social", "chat", "discuss", "discussion", "discussions",
    // Commerce & payments
    "store", "shop", "cart", "checkout", "payment", "payments",
    "billing", "invoice", "invoices", "pay", "purchase",
    "order", "orders", "product", "products",
    // Content delivery
    "cdn", "static", "assets", "media", "images", "img",
    "files", "file", "download", "downloads", "upload", "uploads",
    "content", "data", "storage", "s3", "bucket",
    // AI & analytics
    "ai", "ml", "machinelearning", "artificialintelligence",
    "bot", "bots", "chatbot", "analytics", "metrics",
    "stats", "statistics", "monitoring", "monitor",
    "status", "health", "check", "ping",
    // API & webhooks
    "api1", "api2", "apiv1", "apiv2", "rest", "graphql",
    "webhook", "webhooks", "callback", "callbacks",
    "integration", "integrations", "connect", "sync",
    // Database & backend
    "db", "database", "mysql", "postgres", "postgresql",
    "mongodb", "redis", "cache", "queue", "worker", "workers",
    "job", "jobs", "task", "tasks", "cron",
    // Mobile & apps
    "mobile", "m", "ios", "android", "app-store", "play",
    "download-app", "get-app", "app-download",
    // Legal & corporate
    "legal", "terms", "tos", "privacy", "policy", "policies",
    "gdpr", "compliance", "copyright", "dmca",
    "about", "contact", "careers",
    // Marketing & sales
    "marketing", "promo", "promotion", "promotions",
    "campaign", "campaigns", "landing", "lp",
    "sales", "crm", "lead", "leads",
    // Monitoring & logging
    "logs", "logging", "trace", "tracing", "audit",
    "sentry", "bugsnag", "errors", "error",
    "uptime", "downtime", "incident", "incidents",
    // Testing & automation
    "ci", "cd", "jenkins", "travis", "circleci",
    "gitlab", "github", "bitbucket", "git",
    "build", "builds", "deploy", "deployment", "deployments",
    // Common uses
    "localhost", "local", "root", "system", "sys",
    "server", "servers", "host", "hosts", "node", "nodes",
    "service", "services", "microservice", "microservices",
    // Abuse prevention
    "admin1", "admin2", "administrator", "superuser",
    "root-admin", "sysadmin", "hostmaster", "webmaster",
    "postfix", "dovecot", "apache", "nginx",
    // Cloud & infrastructure
    "cloud", "aws", "azure", "gcp", "digitalocean",
    "heroku", "vercel", "netlify", "cloudflare",
    "kubernetes", "k8s", "docker", "container", "containers",
    // User-facing features
    "profile", "profiles", "user", "users", "member", "members",
    "team", "teams", "organization", "organizations", "org", "orgs",
    "workspace", "workspaces", "project", "projects",
    // Account flows
    "email-verify", "reset-password", "forgot-password",
    "change-password", "update-email", "confirm-email",
    "activate", "activation", "deactivate", "suspend", "suspended",
];

/// Check whether a (lowercased) subdomain is reserved.
pub fn is_reserved(subdomain: &str) -> bool {
    RESERVED_SUBDOMAINS.contains(&subdomain)
}
