//! Hand-rolled async HTTP server: serves the embedded chat page, streams
//! generation events over SSE, and exposes stored artifacts and history.
//! One task per connection; the SSE writer and the generation task share
//! nothing but an event channel, so a dead client never interrupts
//! persistence.

use colored::*;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::knowledge::KnowledgeClient;
use crate::orchestrator::{run_generation, GenerationRequest, StreamEvent};
use crate::providers::ProviderHandle;
use crate::store::MessageStore;
use crate::Result;

/// Everything a connection handler needs, constructed once in `main`.
pub struct ServerState {
    pub store: MessageStore,
    pub client: ProviderHandle,
    pub knowledge: KnowledgeClient,
    pub model: String,
    /// Restricted deployments can pin every turn to chat mode.
    pub chat_only: bool,
}

const SSE_HEADERS: &str = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-cache\r\nConnection: keep-alive\r\nAccess-Control-Allow-Origin: *\r\n\r\n";

/// Frame one SSE event. Payloads are JSON (single line in practice), but a
/// payload with embedded newlines must be split across multiple `data:`
/// lines; a naive single-line write would truncate everything after the
/// first newline on the wire.
pub fn sse_frame(payload: &str) -> String {
    let mut frame = String::with_capacity(payload.len() + 16);
    for line in payload.split('\n') {
        frame.push_str("data: ");
        frame.push_str(line);
        frame.push('\n');
    }
    frame.push('\n');
    frame
}

pub fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            // Decode over raw bytes: slicing `s` here could land inside a
            // multi-byte character when the escape is malformed.
            b'%' if i + 2 < bytes.len()
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit() =>
            {
                let hi = hex_val(bytes[i + 1]);
                let lo = hex_val(bytes[i + 2]);
                out.push(hi << 4 | lo);
                i += 3;
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_val(b: u8) -> u8 {
    match b {
        b'0'..=b'9' => b - b'0',
        b'a'..=b'f' => b - b'a' + 10,
        _ => b - b'A' + 10,
    }
}

pub fn parse_query(query: &str) -> std::collections::HashMap<String, String> {
    let mut params = std::collections::HashMap::new();
    for pair in query.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = match pair.find('=') {
            Some(idx) => (&pair[..idx], &pair[idx + 1..]),
            None => (pair, ""),
        };
        params.insert(url_decode(key), url_decode(value));
    }
    params
}

pub async fn serve(port: u16, state: Arc<ServerState>) -> Result<()> {
    let listener = TcpListener::bind(format!("127.0.0.1:{}", port)).await?;

    eprintln!(
        "{}",
        format!("  demoforge running at http://localhost:{}", port).bright_green()
    );
    eprintln!("{}", "  Press Ctrl+C to stop.".bright_blue());

    loop {
        let (stream, _addr) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, state).await {
                error!(error = %e, "connection handler failed");
            }
        });
    }
}

const MAX_REQUEST_HEAD: usize = 16 * 1024;

async fn handle_connection(
    mut stream: tokio::net::TcpStream,
    state: Arc<ServerState>,
) -> Result<()> {
    // The request head may arrive split across TCP segments; keep reading
    // until httparse sees a complete head.
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    let (method, path_and_query) = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(()); // peer closed before finishing the head
        }
        buf.extend_from_slice(&chunk[..n]);

        let mut headers = [httparse::EMPTY_HEADER; 32];
        let mut request = httparse::Request::new(&mut headers);
        match request.parse(&buf) {
            Ok(httparse::Status::Complete(_)) => {
                let Some(path) = request.path else {
                    return Ok(());
                };
                let method = request.method.unwrap_or("GET").to_string();
                break (method, path.to_string());
            }
            Ok(httparse::Status::Partial) => {
                if buf.len() > MAX_REQUEST_HEAD {
                    write_response(
                        &mut stream,
                        "400 Bad Request",
                        "text/plain",
                        "request head too large",
                    )
                    .await?;
                    return Ok(());
                }
            }
            Err(_) => return Ok(()),
        }
    };

    if method != "GET" {
        write_response(&mut stream, "405 Method Not Allowed", "text/plain", "GET only").await?;
        return Ok(());
    }

    let (path, query_str) = match path_and_query.find('?') {
        Some(idx) => (&path_and_query[..idx], &path_and_query[idx + 1..]),
        None => (path_and_query.as_str(), ""),
    };
    debug!(path, "request");

    match path {
        "/" => {
            write_response(&mut stream, "200 OK", "text/html; charset=utf-8", INDEX_HTML).await?;
        }
        "/generate" => {
            let params = parse_query(query_str);
            let generation = GenerationRequest {
                prompt: params.get("prompt").cloned().unwrap_or_default(),
                conversation_id: params.get("conversation").cloned(),
                pending_message_id: params.get("message").cloned(),
                model: params.get("model").cloned(),
                chat_only: state.chat_only
                    || params.get("chat_only").is_some_and(|v| v == "1"),
            };
            let model = generation
                .model
                .clone()
                .unwrap_or_else(|| state.model.clone());

            stream.write_all(SSE_HEADERS.as_bytes()).await?;

            let (tx, mut rx) = mpsc::unbounded_channel::<StreamEvent>();
            let task_state = state.clone();
            let task = tokio::spawn(async move {
                run_generation(
                    generation,
                    &task_state.store,
                    &task_state.knowledge,
                    &task_state.client,
                    &model,
                    &tx,
                )
                .await
            });

            while let Some(event) = rx.recv().await {
                if let Ok(json) = serde_json::to_string(&event) {
                    if stream.write_all(sse_frame(&json).as_bytes()).await.is_err() {
                        // Client gone; stop forwarding. The generation task
                        // keeps running so the buffer still gets persisted.
                        break;
                    }
                }
            }

            match task.await {
                Ok(Ok(_)) | Ok(Err(_)) => {} // errors already evented
                Err(e) => error!(error = %e, "generation task join failed"),
            }

            // Terminal sentinel on every path.
            let _ = stream.write_all(b"data: [DONE]\n\n").await;
        }
        _ if path.starts_with("/artifact/") => {
            let id = &path["/artifact/".len()..];
            match state.store.get_message(id)? {
                Some(message) => match message.artifact_html {
                    Some(html) => {
                        write_response(&mut stream, "200 OK", "text/html; charset=utf-8", &html)
                            .await?;
                    }
                    None => {
                        write_response(
                            &mut stream,
                            "404 Not Found",
                            "text/plain",
                            "no artifact for this message",
                        )
                        .await?;
                    }
                },
                None => {
                    write_response(&mut stream, "404 Not Found", "text/plain", "unknown message")
                        .await?;
                }
            }
        }
        "/history" => {
            let params = parse_query(query_str);
            let Some(conversation) = params.get("conversation") else {
                write_response(
                    &mut stream,
                    "400 Bad Request",
                    "text/plain",
                    "conversation parameter required",
                )
                .await?;
                return Ok(());
            };
            let messages = state.store.get_messages(conversation)?;
            let body = serde_json::to_string(&messages)
                .unwrap_or_else(|_| "[]".to_string());
            write_response(&mut stream, "200 OK", "application/json", &body).await?;
        }
        _ => {
            write_response(&mut stream, "404 Not Found", "text/plain", "not found").await?;
        }
    }

    Ok(())
}

async fn write_response(
    stream: &mut tokio::net::TcpStream,
    status: &str,
    content_type: &str,
    body: &str,
) -> Result<()> {
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        content_type,
        body.len(),
        body,
    );
    stream.write_all(response.as_bytes()).await?;
    Ok(())
}

/// Embedded single-page chat application: prompt box, streamed transcript,
/// and an inline demo preview that activates as soon as the artifact event
/// arrives.
pub const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>demoforge</title>
<style>
*{margin:0;padding:0;box-sizing:border-box}
body{background:#0d1117;color:#c9d1d9;font-family:'Cascadia Code','Fira Code',monospace;height:100vh;display:flex;flex-direction:column}
header{padding:14px 24px;border-bottom:1px solid #21262d;display:flex;align-items:center;justify-content:space-between}
header h1{font-size:1.1rem;color:#58a6ff}
#status{font-size:.75rem;color:#8b949e}
main{flex:1;display:grid;grid-template-columns:1fr 1fr;min-height:0}
#chat{display:flex;flex-direction:column;border-right:1px solid #21262d;min-width:0}
#transcript{flex:1;overflow-y:auto;padding:16px 20px;display:flex;flex-direction:column;gap:12px}
.msg{max-width:92%;padding:10px 12px;border-radius:8px;font-size:.88rem;line-height:1.6;white-space:pre-wrap;word-wrap:break-word}
.msg.user{align-self:flex-end;background:#1f6feb;color:#fff}
.msg.assistant{align-self:flex-start;background:#161b22;border:1px solid #21262d}
.msg.warn{align-self:center;background:#2d1b00;color:#e3b341;font-size:.78rem}
.msg.err{align-self:center;background:#2d0d0d;color:#f85149;font-size:.78rem}
.demo-link{display:inline-block;margin-top:6px;color:#3fb950;font-size:.78rem;text-decoration:underline;cursor:pointer}
#composer{display:flex;gap:8px;padding:12px 20px;border-top:1px solid #21262d;background:#161b22}
#prompt{flex:1;background:#0d1117;border:1px solid #30363d;color:#c9d1d9;padding:8px 12px;border-radius:6px;font-family:inherit;font-size:.88rem}
#prompt:focus{outline:none;border-color:#58a6ff}
#send{border:none;padding:8px 16px;border-radius:6px;font-family:inherit;font-size:.88rem;cursor:pointer;color:#fff;background:#238636}
#send:hover{background:#2ea043}
#send:disabled{background:#21262d;color:#484f58;cursor:not-allowed}
#preview{display:flex;flex-direction:column;min-width:0}
#preview-bar{padding:8px 16px;border-bottom:1px solid #21262d;font-size:.75rem;color:#8b949e;display:flex;justify-content:space-between}
#frame{flex:1;border:0;background:#fff}
#frame.empty{background:#0d1117}
</style>
</head>
<body>
<header><h1>demoforge</h1><span id="status">idle</span></header>
<main>
<section id="chat">
<div id="transcript"></div>
<div id="composer">
<input id="prompt" type="text" placeholder="Describe a physics concept, e.g. 'damped pendulum'" autofocus>
<button id="send">Generate</button>
</div>
</section>
<section id="preview">
<div id="preview-bar"><span>demo preview</span><a id="open-demo" style="display:none;color:#3fb950" target="_blank">open in tab</a></div>
<iframe id="frame" class="empty" sandbox="allow-scripts"></iframe>
</section>
</main>
<script>
const transcript=document.getElementById('transcript');
const promptEl=document.getElementById('prompt');
const sendBtn=document.getElementById('send');
const statusEl=document.getElementById('status');
const frame=document.getElementById('frame');
const openDemo=document.getElementById('open-demo');
let conversationId=null;
let source=null;

function bubble(cls,text){
  const div=document.createElement('div');
  div.className='msg '+cls;
  div.textContent=text;
  transcript.appendChild(div);
  transcript.scrollTop=transcript.scrollHeight;
  return div;
}

function start(){
  const prompt=promptEl.value.trim();
  if(!prompt||source)return;
  promptEl.value='';
  bubble('user',prompt);
  const reply=bubble('assistant','');
  sendBtn.disabled=true;
  statusEl.textContent='streaming…';
  let url='/generate?prompt='+encodeURIComponent(prompt);
  if(conversationId)url+='&conversation='+encodeURIComponent(conversationId);
  source=new EventSource(url);
  source.onmessage=(e)=>{
    if(e.data==='[DONE]'){
      source.close();source=null;
      sendBtn.disabled=false;
      statusEl.textContent='idle';
      return;
    }
    const ev=JSON.parse(e.data);
    if(ev.type==='meta'){conversationId=ev.conversation_id;}
    else if(ev.type==='delta'){reply.textContent+=ev.text;transcript.scrollTop=transcript.scrollHeight;}
    else if(ev.type==='artifact'){
      const href='/artifact/'+ev.message_id;
      const link=document.createElement('span');
      link.className='demo-link';
      link.textContent='view demo';
      link.onclick=()=>{frame.classList.remove('empty');frame.src=href;};
      reply.appendChild(link);
      openDemo.href=href;
      openDemo.style.display='inline';
      // the artifact fills in once the stream completes
      source.addEventListener('error',()=>{},{once:true});
    }
    else if(ev.type==='warning'){bubble('warn',ev.message);}
    else if(ev.type==='error'){bubble('err',ev.message);}
  };
  source.onerror=()=>{
    if(source){source.close();source=null;}
    sendBtn.disabled=false;
    statusEl.textContent='idle';
  };
}

sendBtn.onclick=start;
promptEl.addEventListener('keydown',(e)=>{if(e.key==='Enter')start();});
</script>
</body>
</html>
"##;
