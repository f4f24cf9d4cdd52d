//! Web UI routes.
//!
//! Server-rendered page shells. Each page carries an inline script that
//! talks to the JSON API; the shared chrome provides the navigation bar, the
//! settings modal and a reusable popup. Placeholders of the form
//! `{{NAME}}` are substituted at render time.

use std::sync::Arc;

use axum::Router;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect};
use axum::routing::get;

use crate::state::AppState;

/// Build the UI router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(|| async { Redirect::to("/cards") }))
        .route("/cards", get(cards_page))
        .route("/cards/edit", get(card_edit_page))
        .route("/worldinfo", get(worldinfo_page))
        .route("/worldinfo/edit", get(worldinfo_edit_page))
        .route("/settings", get(settings_page))
        .route("/favicon.ico", get(|| async { StatusCode::NO_CONTENT.into_response() }))
}

/// Escape text for HTML element and attribute content.
#[must_use]
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn render(title: &str, active: &str, body: &str, script: &str) -> Html<String> {
    let nav = NAV_LINKS
        .iter()
        .map(|(href, label)| {
            let class = if *href == active { " class=\"active\"" } else { "" };
            format!("<a href=\"{href}\"{class}>{label}</a>")
        })
        .collect::<String>();

    let mut html = String::with_capacity(16384);
    html.push_str(&PAGE_HEAD.replace("{{TITLE}}", &escape_html(title)));
    html.push_str(&PAGE_CHROME.replace("{{NAV}}", &nav));
    html.push_str(body);
    html.push_str(SETTINGS_MODAL);
    html.push_str("<script>");
    html.push_str(COMMON_SCRIPT);
    html.push_str(script);
    html.push_str("</script></main></body></html>");
    Html(html)
}

/// The login form. `error` is shown above the form; `next` is carried in a
/// hidden field.
#[must_use]
pub fn login_page(error: Option<&str>, next: &str) -> Html<String> {
    let error_html = error
        .map(|e| format!("<p class=\"error\">{}</p>", escape_html(e)))
        .unwrap_or_default();
    let mut html = String::with_capacity(4096);
    html.push_str(&PAGE_HEAD.replace("{{TITLE}}", "Sign in"));
    html.push_str(
        &LOGIN_BODY
            .replace("{{ERROR}}", &error_html)
            .replace("{{NEXT}}", &escape_html(next)),
    );
    Html(html)
}

async fn cards_page() -> Html<String> {
    render("Cards", "/cards", CARDS_BODY, CARDS_SCRIPT)
}

async fn card_edit_page() -> Html<String> {
    render("Edit card", "/cards", CARD_EDIT_BODY, CARD_EDIT_SCRIPT)
}

async fn worldinfo_page() -> Html<String> {
    render("World info", "/worldinfo", WORLDINFO_BODY, WORLDINFO_SCRIPT)
}

async fn worldinfo_edit_page() -> Html<String> {
    render("Edit lorebook", "/worldinfo", WORLDINFO_EDIT_BODY, WORLDINFO_EDIT_SCRIPT)
}

async fn settings_page() -> Html<String> {
    render("Settings", "/settings", SETTINGS_BODY, SETTINGS_SCRIPT)
}

const NAV_LINKS: [(&str, &str); 3] = [
    ("/cards", "Cards"),
    ("/worldinfo", "World info"),
    ("/settings", "Settings"),
];

// ── Shared chrome ────────────────────────────────────────────────────

const PAGE_HEAD: &str = r##"<!DOCTYPE html>
<html lang="en"><head><meta charset="utf-8"/><meta name="viewport" content="width=device-width,initial-scale=1"/>
<title>{{TITLE}} · cardkeep</title>
<style>
*,*::before,*::after{box-sizing:border-box}
:root{--bg:#16171d;--panel:#1f2129;--border:#2f323d;--text:#e6e6ea;--muted:#9a9cab;--accent:#7aa2f7;--danger:#f7768e}
body{margin:0;font-family:system-ui,-apple-system,sans-serif;background:var(--bg);color:var(--text);line-height:1.5}
a{color:var(--accent);text-decoration:none}
header{display:flex;align-items:center;gap:24px;padding:12px 24px;border-bottom:1px solid var(--border);background:var(--panel)}
header .brand{font-weight:700}
header nav{display:flex;gap:8px;flex:1}
header nav a{color:var(--muted);padding:6px 12px;border-radius:6px}
header nav a.active,header nav a:hover{color:var(--text);background:rgba(255,255,255,.06)}
main{max-width:1100px;margin:0 auto;padding:24px}
input,select,textarea,button{font:inherit;color:var(--text);background:var(--bg);border:1px solid var(--border);border-radius:6px;padding:6px 10px}
textarea{width:100%;min-height:360px;font-family:ui-monospace,monospace;font-size:13px}
button{cursor:pointer;background:var(--panel)}
button.primary{background:var(--accent);color:#111;border-color:var(--accent)}
button.danger{color:var(--danger);border-color:var(--danger)}
.toolbar{display:flex;flex-wrap:wrap;gap:8px;align-items:center;margin-bottom:16px}
table{width:100%;border-collapse:collapse}
th,td{text-align:left;padding:8px;border-bottom:1px solid var(--border)}
.tag{display:inline-block;font-size:12px;padding:0 8px;margin:0 4px 4px 0;border-radius:10px;background:rgba(122,162,247,.15)}
.muted{color:var(--muted)}
.error{color:var(--danger)}
.overlay{position:fixed;inset:0;background:rgba(0,0,0,.55);display:none;align-items:center;justify-content:center;z-index:10}
.overlay.open{display:flex}
.dialog{background:var(--panel);border:1px solid var(--border);border-radius:10px;padding:20px;width:min(720px,92vw);max-height:86vh;overflow:auto}
.dialog h2{margin-top:0}
.grid{display:grid;grid-template-columns:200px 1fr;gap:8px 12px;align-items:center}
.login{max-width:340px;margin:12vh auto;background:var(--panel);padding:28px;border-radius:10px;border:1px solid var(--border)}
.login input{width:100%;margin-bottom:12px}
</style></head>
"##;

const PAGE_CHROME: &str = r##"<body>
<header><span class="brand">cardkeep</span><nav>{{NAV}}</nav>
<button onclick="openSettings()">⚙</button><a href="/logout">Log out</a></header>
<main>
<div id="popup" class="overlay" onclick="if(event.target===this)closePopup()"><div class="dialog"><h2 id="popup-title"></h2><div id="popup-body"></div>
<p><button onclick="closePopup()">Close</button></p></div></div>
"##;

const LOGIN_BODY: &str = r##"<body><form class="login" method="post" action="/login">
<h2>cardkeep</h2>{{ERROR}}
<input name="username" placeholder="Username" autocomplete="username" required autofocus/>
<input name="password" type="password" placeholder="Password" autocomplete="current-password" required/>
<input type="hidden" name="next" value="{{NEXT}}"/>
<button class="primary" type="submit">Sign in</button>
</form></body></html>
"##;

const SETTINGS_MODAL: &str = r##"<div id="settings" class="overlay" onclick="if(event.target===this)closeSettings()"><div class="dialog">
<h2>Settings</h2><p id="settings-pinned" class="muted"></p>
<div class="grid">
<label>Cards directory</label><input id="s-cards_dir"/>
<label>World info directory</label><input id="s-world_info_dir"/>
<label>Resources directory</label><input id="s-resources_dir"/>
<label>Trash directory</label><input id="s-trash_dir"/>
<label>Entry history limit</label><input id="s-wi_entry_history_limit" type="number" min="1" max="100"/>
<label>Page size</label><input id="s-page_size" type="number" min="1"/>
<label>Username</label><input id="s-username" autocomplete="off"/>
<label>Password</label><input id="s-password" type="password" autocomplete="new-password" placeholder="unchanged"/>
<label>Trusted IPs</label><input id="s-trusted_ips" placeholder="192.168.1.0/24, 10.*"/>
<label>Session lifetime (hours)</label><input id="s-session_ttl_hours" type="number" min="1"/>
<label>Trust loopback</label><input id="s-trust_loopback" type="checkbox"/>
<label>Trust proxy headers</label><input id="s-trust_proxy_headers" type="checkbox"/>
</div>
<p id="settings-error" class="error"></p>
<p><button class="primary" onclick="saveSettings()">Save</button> <button onclick="closeSettings()">Cancel</button></p>
</div></div>
"##;

const COMMON_SCRIPT: &str = r##"
const qs = new URLSearchParams(location.search);
function esc(s){return String(s??'').replace(/[&<>"']/g,c=>({'&':'&amp;','<':'&lt;','>':'&gt;','"':'&quot;',"'":'&#39;'}[c]));}
function idPath(id){return id.split('/').map(encodeURIComponent).join('/');}
async function api(method, url, body){
  const opts={method,headers:{}};
  if(body instanceof FormData){opts.body=body;}
  else if(body!==undefined){opts.headers['Content-Type']='application/json';opts.body=JSON.stringify(body);}
  const r=await fetch(url,opts);
  if(r.status===401){location.href='/login?next='+encodeURIComponent(location.pathname+location.search);throw new Error('login required');}
  const data=r.headers.get('content-type')?.includes('json')?await r.json():null;
  if(!r.ok)throw new Error(data?.message||r.statusText);
  return data;
}
function popup(title, html){document.getElementById('popup-title').textContent=title;document.getElementById('popup-body').innerHTML=html;document.getElementById('popup').classList.add('open');}
function closePopup(){document.getElementById('popup').classList.remove('open');}
function fail(e){popup('Error','<p class="error">'+esc(e.message)+'</p>');}
const settingsFields=['cards_dir','world_info_dir','resources_dir','trash_dir','wi_entry_history_limit','page_size'];
async function openSettings(){
  const {settings,pinned}=await api('GET','/api/settings');
  for(const f of settingsFields)document.getElementById('s-'+f).value=settings[f];
  document.getElementById('s-username').value=settings.auth.username;
  document.getElementById('s-password').value='';
  document.getElementById('s-trusted_ips').value=settings.auth.trusted_ips.join(', ');
  document.getElementById('s-session_ttl_hours').value=settings.auth.session_ttl_hours;
  document.getElementById('s-trust_loopback').checked=settings.auth.trust_loopback;
  document.getElementById('s-trust_proxy_headers').checked=settings.auth.trust_proxy_headers;
  document.getElementById('settings-pinned').textContent=pinned.length?'Set by environment: '+pinned.join(', '):'';
  document.getElementById('settings-error').textContent='';
  document.getElementById('settings').classList.add('open');
}
function closeSettings(){document.getElementById('settings').classList.remove('open');}
async function saveSettings(){
  const v=f=>document.getElementById('s-'+f).value;
  const update={auth:{
    username:v('username'),
    trusted_ips:v('trusted_ips').split(',').map(s=>s.trim()).filter(Boolean),
    session_ttl_hours:Number(v('session_ttl_hours')),
    trust_loopback:document.getElementById('s-trust_loopback').checked,
    trust_proxy_headers:document.getElementById('s-trust_proxy_headers').checked}};
  if(v('password'))update.auth.password=v('password');
  for(const f of settingsFields){const n=Number(v(f));update[f]=(f.endsWith('_dir'))?v(f):n;}
  try{const r=await api('POST','/api/settings',update);closeSettings();if(r.credentials_changed)location.href='/login';else location.reload();}
  catch(e){document.getElementById('settings-error').textContent=e.message;}
}
"##;

// ── Cards ────────────────────────────────────────────────────────────

const CARDS_BODY: &str = r##"<h1>Cards</h1>
<div class="toolbar">
<input id="search" placeholder="Search"/><input id="tag" placeholder="Tag"/>
<select id="folder"><option value="">All folders</option></select>
<label><input id="fav" type="checkbox"/> Favorites</label>
<select id="sort"><option value="name">Name</option><option value="modified">Modified</option></select>
<button onclick="load(1)">Filter</button>
<button onclick="importCard()">New card</button>
</div>
<table><thead><tr><th></th><th>Name</th><th>Creator</th><th>Tags</th><th>Folder</th></tr></thead><tbody id="rows"></tbody></table>
<div class="toolbar"><button id="prev">‹</button><span id="pageinfo" class="muted"></span><button id="next">›</button></div>
"##;

const CARDS_SCRIPT: &str = r##"
let page=1;
async function load(p){
  page=p;
  const params=new URLSearchParams({page:String(p)});
  for(const k of ['search','tag','folder','sort']){const v=document.getElementById(k).value;if(v)params.set(k,v);}
  if(document.getElementById('fav').checked)params.set('favorites_only','true');
  try{
    const data=await api('GET','/api/cards?'+params);
    document.getElementById('rows').innerHTML=data.items.map(c=>
      '<tr><td>'+(c.favorite?'★':'')+'</td><td><a href="/cards/edit?id='+encodeURIComponent(c.id)+'">'+esc(c.name||c.id)+'</a></td><td>'+esc(c.creator)+'</td><td>'+
      c.tags.map(t=>'<span class="tag">'+esc(t)+'</span>').join('')+'</td><td class="muted">'+esc(c.folder)+'</td></tr>').join('');
    const pages=Math.max(1,Math.ceil(data.total/data.page_size));
    document.getElementById('pageinfo').textContent='Page '+data.page+' of '+pages+' ('+data.total+' cards)';
    document.getElementById('prev').onclick=()=>page>1&&load(page-1);
    document.getElementById('next').onclick=()=>page<pages&&load(page+1);
  }catch(e){fail(e);}
}
async function loadFolders(){
  const {folders}=await api('GET','/api/cards/folders');
  document.getElementById('folder').innerHTML+=folders.map(f=>'<option>'+esc(f)+'</option>').join('');
}
function importCard(){
  popup('New card','<p>Folder <input id="nc-folder"/></p><textarea id="nc-json">{"spec":"chara_card_v2","spec_version":"2.0","data":{"name":"","tags":[]}}</textarea><p><button class="primary" onclick="createCard()">Create</button></p>');
}
async function createCard(){
  try{
    const card=JSON.parse(document.getElementById('nc-json').value);
    const {id}=await api('POST','/api/cards',{folder:document.getElementById('nc-folder').value,card});
    location.href='/cards/edit?id='+encodeURIComponent(id);
  }catch(e){fail(e);}
}
loadFolders().catch(fail);load(1);
"##;

const CARD_EDIT_BODY: &str = r##"<h1 id="title">Card</h1>
<div class="toolbar">
<button class="primary" onclick="save()">Save</button>
<button onclick="toggleFav()" id="favbtn">☆</button>
<input id="addtag" placeholder="Add tag"/><button onclick="addTag()">Add</button>
<input id="moveto" placeholder="Folder"/><button onclick="moveCard()">Move</button>
<button class="danger" onclick="del()">Delete</button>
</div>
<p id="tags"></p>
<div class="grid"><label>Summary</label><input id="m-summary"/><label>Link</label><input id="m-link"/></div>
<p><button onclick="saveMeta()">Save notes</button></p>
<textarea id="json"></textarea>
<h2>Resources</h2>
<div class="toolbar"><button onclick="makeFolder()">Create folder</button><input type="file" id="upload"/><button onclick="upload()">Upload</button></div>
<table><tbody id="resources"></tbody></table>
"##;

const CARD_EDIT_SCRIPT: &str = r##"
let id=qs.get('id')||'';let doc=null;
async function load(){
  try{
    doc=await api('GET','/api/cards/file/'+idPath(id));
    document.getElementById('title').textContent=doc.summary.name||id;
    document.getElementById('json').value=JSON.stringify(doc.card,null,2);
    document.getElementById('favbtn').textContent=doc.summary.favorite?'★':'☆';
    document.getElementById('tags').innerHTML=doc.summary.tags.map(t=>'<span class="tag">'+esc(t)+' <a href="#" data-t="'+esc(t)+'" onclick="removeTag(this.dataset.t);return false">×</a></span>').join('');
    const meta=await api('GET','/api/cards/meta/'+idPath(id));
    document.getElementById('m-summary').value=meta.summary;document.getElementById('m-link').value=meta.link;
    await loadResources();
  }catch(e){fail(e);}
}
async function save(){try{await api('PUT','/api/cards/file/'+idPath(id),JSON.parse(document.getElementById('json').value));await load();}catch(e){fail(e);}}
async function attrs(change){try{await api('POST','/api/cards/attributes',Object.assign({id},change));await load();}catch(e){fail(e);}}
function toggleFav(){attrs({favorite:!doc.summary.favorite});}
function addTag(){const t=document.getElementById('addtag').value.trim();if(t)attrs({add_tags:[t]});}
function removeTag(t){attrs({remove_tags:[t]});}
async function moveCard(){try{const r=await api('POST','/api/cards/move',{id,folder:document.getElementById('moveto').value});location.href='/cards/edit?id='+encodeURIComponent(r.id);}catch(e){fail(e);}}
async function del(){if(!confirm('Move this card to the trash?'))return;try{await api('DELETE','/api/cards/file/'+idPath(id));location.href='/cards';}catch(e){fail(e);}}
async function saveMeta(){try{await api('PUT','/api/cards/meta/'+idPath(id),{summary:document.getElementById('m-summary').value,link:document.getElementById('m-link').value});}catch(e){fail(e);}}
async function loadResources(){
  const r=await api('GET','/api/resources?card_id='+encodeURIComponent(id));
  document.getElementById('resources').innerHTML=r.folder===null?'<tr><td class="muted">No resource folder</td></tr>':
    r.files.map(f=>'<tr><td><a href="/resources_file/'+idPath(r.folder+'/'+f.name)+'" target="_blank">'+esc(f.name)+'</a></td><td class="muted">'+f.size+' B</td><td><button class="danger" data-f="'+esc(f.name)+'" onclick="delRes(this.dataset.f)">Delete</button></td></tr>').join('');
}
async function makeFolder(){try{await api('POST','/api/resources/folder',{card_id:id});await loadResources();}catch(e){fail(e);}}
async function upload(){
  const input=document.getElementById('upload');if(!input.files.length)return;
  const fd=new FormData();fd.append('card_id',id);fd.append('file',input.files[0]);
  try{await api('POST','/api/upload_card_resource',fd);input.value='';await loadResources();}catch(e){fail(e);}
}
async function delRes(name){try{await api('POST','/api/delete_resource_file',{card_id:id,filename:name});await loadResources();}catch(e){fail(e);}}
load();
"##;

// ── World info ───────────────────────────────────────────────────────

const WORLDINFO_BODY: &str = r##"<h1>World info</h1>
<div class="toolbar"><input id="search" placeholder="Search"/><button onclick="load()">Filter</button>
<input id="newname" placeholder="New lorebook name"/><button onclick="create()">Create</button></div>
<table><thead><tr><th>Name</th><th>Entries</th><th>Modified</th></tr></thead><tbody id="rows"></tbody></table>
"##;

const WORLDINFO_SCRIPT: &str = r##"
async function load(){
  const s=document.getElementById('search').value;
  try{
    const {items}=await api('GET','/api/worldinfo'+(s?'?search='+encodeURIComponent(s):''));
    document.getElementById('rows').innerHTML=items.map(b=>'<tr><td><a href="/worldinfo/edit?id='+encodeURIComponent(b.id)+'">'+esc(b.name)+'</a></td><td>'+b.entry_count+'</td><td class="muted">'+esc(b.modified)+'</td></tr>').join('');
  }catch(e){fail(e);}
}
async function create(){
  const name=document.getElementById('newname').value.trim();if(!name)return;
  try{const {id}=await api('POST','/api/worldinfo',{name});location.href='/worldinfo/edit?id='+encodeURIComponent(id);}catch(e){fail(e);}
}
load();
"##;

const WORLDINFO_EDIT_BODY: &str = r##"<h1 id="title">Lorebook</h1>
<div class="toolbar"><button class="primary" onclick="save()">Save</button><button class="danger" onclick="del()">Delete</button><span id="status" class="muted"></span></div>
<table><thead><tr><th>Entry</th><th>Keys</th><th></th></tr></thead><tbody id="entries"></tbody></table>
<textarea id="json"></textarea>
"##;

const WORLDINFO_EDIT_SCRIPT: &str = r##"
let id=qs.get('id')||'';
function entryList(book){const e=book.entries||{};return Array.isArray(e)?e:Object.values(e);}
async function load(){
  try{
    const doc=await api('GET','/api/worldinfo/file/'+idPath(id));
    document.getElementById('title').textContent=doc.summary.name;
    document.getElementById('json').value=JSON.stringify(doc.book,null,2);
    document.getElementById('entries').innerHTML=entryList(doc.book).map(e=>'<tr><td>'+esc(e.comment||e.uid)+'</td><td class="muted">'+esc([].concat(e.key||e.keys||[]).join(', '))+'</td><td>'+
      (e.st_manager_uid?'<button data-uid="'+esc(e.st_manager_uid)+'" onclick="showHistory(this.dataset.uid)">History</button>':'')+'</td></tr>').join('');
  }catch(e){fail(e);}
}
async function save(){
  try{const r=await api('PUT','/api/worldinfo/file/'+idPath(id),JSON.parse(document.getElementById('json').value));
  document.getElementById('status').textContent='Saved, '+r.history_recorded+' previous version(s) kept';await load();}catch(e){fail(e);}
}
async function del(){if(!confirm('Move this lorebook to the trash?'))return;try{await api('DELETE','/api/worldinfo/file/'+idPath(id));location.href='/worldinfo';}catch(e){fail(e);}}
async function showHistory(uid){
  try{
    const {items}=await api('GET','/api/worldinfo/history?id='+encodeURIComponent(id)+'&uid='+encodeURIComponent(uid));
    popup('Entry history',items.length?items.map(r=>'<h3>'+esc(r.created_at)+'</h3><pre>'+esc(JSON.stringify(r.snapshot,null,2))+'</pre>').join(''):'<p class="muted">No previous versions.</p>');
  }catch(e){fail(e);}
}
load();
"##;

// ── Settings page ────────────────────────────────────────────────────

const SETTINGS_BODY: &str = r##"<h1>Settings</h1>
<p><button onclick="openSettings()">Edit settings</button></p>
<h2>Statistics</h2><p id="stats" class="muted"></p>
<h2>Backups</h2>
<div class="grid">
<label>Enabled</label><input id="b-enabled" type="checkbox"/>
<label>Schedule</label><select id="b-schedule"><option>disabled</option><option>daily</option><option>weekly</option></select>
<label>Hour</label><input id="b-hour" type="number" min="0" max="23"/>
<label>Day of week (0 = Sunday)</label><input id="b-day_of_week" type="number" min="0" max="6"/>
<label>Retention (days, 0 = keep)</label><input id="b-retention_days" type="number" min="0"/>
<label>Backup directory</label><input id="b-path" placeholder="data/backups"/>
</div>
<div class="toolbar"><button onclick="saveSchedule()">Save schedule</button><button class="primary" onclick="trigger(false)">Back up now</button><button onclick="trigger(true)">Incremental backup</button></div>
<table><thead><tr><th>Backup</th><th>Resources</th><th>Files</th><th>Size</th><th></th></tr></thead><tbody id="backups"></tbody></table>
"##;

const SETTINGS_SCRIPT: &str = r##"
const scheduleFields=['hour','day_of_week','retention_days'];
async function load(){
  try{
    const s=await api('GET','/api/v2/stats');
    document.getElementById('stats').textContent=s.characters+' cards, '+s.worldbooks+' lorebooks, '+s.presets+' presets, '+s.regexScripts+' regex scripts';
    const b=await api('GET','/api/v2/backup/schedule');
    document.getElementById('b-enabled').checked=b.enabled;document.getElementById('b-schedule').value=b.schedule;
    for(const f of scheduleFields)document.getElementById('b-'+f).value=b[f];
    document.getElementById('b-path').value=b.path;
    const {backups}=await api('GET','/api/v2/backup/list');
    document.getElementById('backups').innerHTML=backups.map(x=>'<tr><td>'+esc(x.id)+(x.incremental?' <span class="tag">incremental</span>':'')+'</td><td>'+esc(x.resources.join(', '))+'</td><td>'+x.file_count+'</td><td>'+x.size_mb.toFixed(2)+' MB</td><td>'+
      '<button data-id="'+esc(x.id)+'" onclick="restore(this.dataset.id)">Restore</button> <button class="danger" data-id="'+esc(x.id)+'" onclick="removeBackup(this.dataset.id)">Delete</button></td></tr>').join('');
  }catch(e){fail(e);}
}
async function saveSchedule(){
  const body={enabled:document.getElementById('b-enabled').checked,schedule:document.getElementById('b-schedule').value,path:document.getElementById('b-path').value};
  for(const f of scheduleFields)body[f]=Number(document.getElementById('b-'+f).value);
  try{await api('POST','/api/v2/backup/schedule',body);await load();}catch(e){fail(e);}
}
async function trigger(incremental){try{const m=await api('POST','/api/v2/backup/trigger',{incremental});popup('Backup complete','<p>'+esc(m.id)+': '+m.file_count+' files</p>');await load();}catch(e){fail(e);}}
async function restore(id){if(!confirm('Replace the current library with backup '+id+'?'))return;try{const r=await api('POST','/api/v2/backup/restore',{backup_id:id});popup('Restored','<p>'+esc(r.restored.join(', '))+'</p>');}catch(e){fail(e);}}
async function removeBackup(id){if(!confirm('Delete backup '+id+'?'))return;try{await api('DELETE','/api/v2/backup/delete?backup_id='+encodeURIComponent(id));await load();}catch(e){fail(e);}}
load();
"##;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_markup() {
        assert_eq!(
            escape_html(r#"<a href="x">'&'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;&#39;&amp;&#39;&lt;/a&gt;"
        );
    }

    #[test]
    fn login_page_escapes_next() {
        let Html(page) = login_page(Some("bad <login>"), "/cards\"><script>");
        assert!(page.contains("bad &lt;login&gt;"));
        assert!(page.contains("value=\"/cards&quot;&gt;&lt;script&gt;\""));
    }

    #[test]
    fn active_nav_link_is_marked() {
        let Html(page) = render("Cards", "/cards", "", "");
        assert!(page.contains("<a href=\"/cards\" class=\"active\">Cards</a>"));
        assert!(page.contains("<a href=\"/worldinfo\">World info</a>"));
    }

    #[test]
    fn entry_keys_accept_string_or_list() {
        assert!(WORLDINFO_EDIT_SCRIPT.contains("[].concat(e.key||e.keys||[]).join(', ')"));
        assert!(!WORLDINFO_EDIT_SCRIPT.contains("esc((e.key"));
    }
}
