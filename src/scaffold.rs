//! Starter projects for deploys that arrive without an archive
//!
//! Laravel and React get their skeleton from the ecosystem's own generator
//! running in a one-shot container. Node and Next get a handful of files
//! written here, followed by `npm install`.
//!
//! Nothing in this module fails a deploy. Every problem ends up in
//! [`ScaffoldOutcome::Failed`] and a `warn!` record.

use crate::runtime::{Bind, ContainerRuntime, OneShotJob};
use serde::Serialize;
use std::path::Path;
use tracing::{info, warn};

/// Where `data/` is mounted in scaffold containers
const APP_DIR: &str = "/app";

const NODE_IMAGE: &str = "node:18";
const COMPOSER_IMAGE: &str = "composer:latest";

/// Starter project generator attached to a stack type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Scaffold {
    /// `composer create-project laravel/laravel .`
    LaravelSkeleton,
    /// `npm init vite@latest . -- --template react`, then `npm install`
    ViteReact,
    /// Express app with nodemon, then `npm install`
    ExpressStarter,
    /// Pages-router Next.js app, then `npm install`
    NextStarter,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ScaffoldOutcome {
    /// Scaffolding did not run
    Skipped { reason: String },
    Succeeded,
    /// Scaffolding ran and failed; `data/` may be empty or partial
    Failed { reason: String },
}

impl ScaffoldOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, ScaffoldOutcome::Failed { .. })
    }
}

pub struct Scaffolder<'a> {
    runtime: &'a dyn ContainerRuntime,
}

impl<'a> Scaffolder<'a> {
    pub fn new(runtime: &'a dyn ContainerRuntime) -> Self {
        Self { runtime }
    }

    /// Generate `scaffold` into `data_dir`, discarding whatever is there.
    pub async fn run(&self, scaffold: Scaffold, data_dir: &Path) -> ScaffoldOutcome {
        info!(?scaffold, dir = %data_dir.display(), "Scaffolding starter project");

        match self.generate(scaffold, data_dir).await {
            Ok(()) => {
                info!(?scaffold, "Starter project ready");
                ScaffoldOutcome::Succeeded
            }
            Err(e) => {
                let reason = format!("{:#}", e);
                warn!(?scaffold, reason = %reason, "Scaffolding failed, continuing deploy");
                ScaffoldOutcome::Failed { reason }
            }
        }
    }

    async fn generate(&self, scaffold: Scaffold, data_dir: &Path) -> anyhow::Result<()> {
        clear_dir(data_dir).await?;

        let mount = Bind::rw(data_dir, APP_DIR);
        let npm_install = || {
            OneShotJob::new("npm-install", NODE_IMAGE, ["npm", "install"])
                .with_bind(mount.clone())
                .with_working_dir(APP_DIR)
        };

        match scaffold {
            Scaffold::LaravelSkeleton => {
                let job = OneShotJob::new(
                    "laravel-create-project",
                    COMPOSER_IMAGE,
                    ["create-project", "laravel/laravel", "."],
                )
                .with_bind(mount.clone())
                .with_working_dir(APP_DIR);
                self.runtime.run_once(&job).await?;
            }
            Scaffold::ViteReact => {
                let job = OneShotJob::new(
                    "vite-create",
                    NODE_IMAGE,
                    ["npm", "init", "vite@latest", ".", "--", "--template", "react"],
                )
                .with_bind(mount.clone())
                .with_working_dir(APP_DIR);
                self.runtime.run_once(&job).await?;
                self.runtime.run_once(&npm_install()).await?;
            }
            Scaffold::ExpressStarter => {
                write_files(data_dir, EXPRESS_FILES).await?;
                self.runtime.run_once(&npm_install()).await?;
            }
            Scaffold::NextStarter => {
                tokio::fs::create_dir_all(data_dir.join("public")).await?;
                write_files(data_dir, NEXT_FILES).await?;
                self.runtime.run_once(&npm_install()).await?;
            }
        }

        Ok(())
    }
}

/// Empty `dir`, recreating it if it had content
async fn clear_dir(dir: &Path) -> std::io::Result<()> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    if entries.next_entry().await?.is_some() {
        warn!(dir = %dir.display(), "Discarding existing content before scaffolding");
        tokio::fs::remove_dir_all(dir).await?;
        tokio::fs::create_dir(dir).await?;
    }
    Ok(())
}

async fn write_files(dir: &Path, files: &[(&str, &str)]) -> std::io::Result<()> {
    for (name, content) in files {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, content).await?;
    }
    Ok(())
}

const EXPRESS_FILES: &[(&str, &str)] = &[
    (
        "package.json",
        r#"{
  "name": "nodejs-app",
  "version": "1.0.0",
  "description": "Node.js Application",
  "main": "index.js",
  "scripts": {
    "start": "node index.js",
    "dev": "nodemon index.js"
  },
  "dependencies": {
    "express": "^4.18.2"
  },
  "devDependencies": {
    "nodemon": "^3.0.1"
  }
}
"#,
    ),
    (
        "index.js",
        r#"const express = require('express');
const app = express();
const port = 3000;

app.get('/', (req, res) => {
  res.send('Hello from Node.js! Edit index.js to customize your app. Nodemon restarts it when files change.');
});

app.listen(port, '0.0.0.0', () => {
  console.log(`Node.js app listening on http://0.0.0.0:${port}`);
});
"#,
    ),
];

const NEXT_FILES: &[(&str, &str)] = &[
    (
        "package.json",
        r#"{
  "name": "nextjs-app",
  "version": "0.1.0",
  "private": true,
  "scripts": {
    "dev": "next dev",
    "build": "next build",
    "start": "next start",
    "lint": "next lint"
  },
  "dependencies": {
    "next": "14.0.3",
    "react": "^18.2.0",
    "react-dom": "^18.2.0"
  }
}
"#,
    ),
    (
        "pages/_app.js",
        r#"import '../styles/globals.css'

function MyApp({ Component, pageProps }) {
  return <Component {...pageProps} />
}

export default MyApp
"#,
    ),
    (
        "pages/index.js",
        r#"export default function Home() {
  return (
    <div style={{ padding: '20px', fontFamily: 'Arial, sans-serif' }}>
      <h1>Welcome to your Next.js app!</h1>
      <p>
        Edit <code>pages/index.js</code> to customize this page.
        Changes are picked up automatically.
      </p>
    </div>
  )
}
"#,
    ),
    (
        "styles/globals.css",
        r#"html,
body {
  padding: 0;
  margin: 0;
  font-family: -apple-system, BlinkMacSystemFont, Segoe UI, Roboto, Oxygen,
    Ubuntu, Cantarell, Fira Sans, Droid Sans, Helvetica Neue, sans-serif;
}

a {
  color: inherit;
  text-decoration: none;
}

* {
  box-sizing: border-box;
}
"#,
    ),
    (
        ".gitignore",
        r#"# dependencies
/node_modules
/.pnp
.pnp.js

# testing
/coverage

# next.js
/.next/
/out/

# production
/build

# misc
.DS_Store
*.pem

# debug
npm-debug.log*
yarn-debug.log*
yarn-error.log*

# local env files
.env*.local

# vercel
.vercel
"#,
    ),
];
