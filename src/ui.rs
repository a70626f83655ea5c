use crate::client::dashboard::EXPENSE_CATEGORIES;
use crate::client::token_store::AUTH_TOKEN_KEY;

pub fn render_index() -> String {
    let options: String = EXPENSE_CATEGORIES
        .iter()
        .map(|category| format!(r#"<option value="{category}">{category}</option>"#))
        .collect();

    INDEX_HTML
        .replace("{{TOKEN_KEY}}", AUTH_TOKEN_KEY)
        .replace("{{CATEGORY_OPTIONS}}", &options)
}

const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="es">
<head>
  <meta charset="UTF-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1.0" />
  <title>Driver's Ledger</title>
  <style>
    :root {
      --bg-1: #eef3f0;
      --ink: #22302b;
      --income: #2f8f5b;
      --expense: #c8473a;
      --balance: #2f6f8f;
      --card: rgba(255, 255, 255, 0.92);
      --shadow: 0 24px 60px rgba(34, 48, 43, 0.16);
    }

    * {
      box-sizing: border-box;
    }

    body {
      margin: 0;
      min-height: 100vh;
      background: linear-gradient(135deg, var(--bg-1), #dde8e2 60%, #f4f7f5 100%);
      color: var(--ink);
      font-family: "Trebuchet MS", sans-serif;
      display: grid;
      place-items: start center;
      padding: 32px 18px 48px;
    }

    .app {
      width: min(760px, 100%);
      background: var(--card);
      border-radius: 24px;
      box-shadow: var(--shadow);
      padding: 32px;
      display: grid;
      gap: 24px;
    }

    header {
      display: flex;
      justify-content: space-between;
      align-items: center;
      gap: 12px;
    }

    h1 {
      margin: 0;
      font-size: clamp(1.6rem, 4vw, 2.2rem);
    }

    .hidden {
      display: none !important;
    }

    form {
      display: grid;
      gap: 12px;
    }

    input,
    select {
      padding: 12px 14px;
      border-radius: 12px;
      border: 1px solid rgba(34, 48, 43, 0.2);
      font-size: 1rem;
    }

    button {
      appearance: none;
      border: none;
      border-radius: 999px;
      padding: 12px 18px;
      font-size: 1rem;
      font-weight: 600;
      cursor: pointer;
      background: var(--balance);
      color: white;
    }

    button.secondary {
      background: white;
      color: var(--balance);
      border: 1px solid var(--balance);
    }

    .alert {
      padding: 10px 14px;
      border-radius: 12px;
      background: #fbe3e0;
      color: var(--expense);
    }

    .panel {
      display: grid;
      grid-template-columns: repeat(auto-fit, minmax(160px, 1fr));
      gap: 14px;
    }

    .stat {
      border-radius: 18px;
      padding: 16px;
      color: white;
      display: grid;
      gap: 6px;
    }

    .stat .label {
      font-size: 0.8rem;
      text-transform: uppercase;
      letter-spacing: 0.1em;
    }

    .stat .value {
      font-size: 1.6rem;
      font-weight: 600;
    }

    .stat.income { background: var(--income); }
    .stat.expense { background: var(--expense); }
    .stat.balance { background: var(--balance); }

    .types {
      display: flex;
      gap: 16px;
    }

    ul.history {
      list-style: none;
      margin: 0;
      padding: 0;
      display: grid;
      gap: 8px;
    }

    ul.history li {
      display: flex;
      justify-content: space-between;
      align-items: center;
      background: white;
      border-radius: 12px;
      padding: 12px 14px;
      border: 1px solid rgba(34, 48, 43, 0.08);
    }

    .badge {
      border-radius: 999px;
      padding: 2px 10px;
      font-size: 0.85rem;
      background: #e5ebe8;
      margin-left: 6px;
    }

    .amount.income { color: var(--income); font-weight: 600; }
    .amount.expense { color: var(--expense); font-weight: 600; }

    small {
      color: #6b7a74;
    }
  </style>
</head>
<body>
  <main class="app">
    <header>
      <h1>Driver's Ledger</h1>
      <button id="logout" class="secondary hidden" type="button">Log Out</button>
    </header>

    <p id="loading">Cargando...</p>

    <section id="login-view" class="hidden">
      <h2>Log In</h2>
      <div id="login-error" class="alert hidden"></div>
      <form id="login-form">
        <input id="login-email" type="email" placeholder="Email" required />
        <input id="login-password" type="password" placeholder="Password" required />
        <button type="submit">Log In</button>
      </form>
      <p><button id="google-login" class="secondary" type="button">Sign In with Google</button></p>
      <p>Need an account? <a href="#/signup">Sign Up</a></p>
    </section>

    <section id="signup-view" class="hidden">
      <h2>Sign Up</h2>
      <div id="signup-error" class="alert hidden"></div>
      <div id="signup-ok" class="alert hidden"></div>
      <form id="signup-form">
        <input id="signup-email" type="email" placeholder="Email" required />
        <input id="signup-password" type="password" placeholder="Password" required />
        <button type="submit">Sign Up</button>
      </form>
      <p>Already have an account? <a href="#/login">Log In</a></p>
    </section>

    <section id="dashboard-view" class="hidden">
      <div class="panel">
        <div class="stat income"><span class="label">Ganancias Diarias</span><span class="value" id="earnings">$0.00</span></div>
        <div class="stat expense"><span class="label">Gastos Diarios</span><span class="value" id="expenses">$0.00</span></div>
        <div class="stat balance"><span class="label">Balance Diario</span><span class="value" id="balance">$0.00</span></div>
      </div>

      <h2>Añadir Nuevo Registro</h2>
      <form id="entry-form">
        <div class="types">
          <label><input type="radio" name="entry-type" value="income" checked /> Ingreso</label>
          <label><input type="radio" name="entry-type" value="expense" /> Gasto</label>
        </div>
        <input id="entry-amount" type="number" step="0.01" placeholder="0.00" required />
        <select id="entry-category" class="hidden">
          <option value="">Selecciona una categoría</option>
          {{CATEGORY_OPTIONS}}
        </select>
        <button type="submit">Añadir</button>
      </form>

      <h2>Historial de Registros</h2>
      <ul class="history" id="history"></ul>
    </section>
  </main>

  <script>
    const TOKEN_KEY = '{{TOKEN_KEY}}';
    const API = '/api';
    const $ = (id) => document.getElementById(id);
    const views = { login: $('login-view'), signup: $('signup-view'), dashboard: $('dashboard-view') };

    const getToken = () => localStorage.getItem(TOKEN_KEY);
    const money = (value) => `$${Number(value).toFixed(2)}`;

    const show = (el, visible) => el.classList.toggle('hidden', !visible);
    const alertIn = (el, message) => {
      el.textContent = message || '';
      show(el, Boolean(message));
    };

    const localIso = (date) => {
      const pad = (n, w = 2) => String(Math.abs(n)).padStart(w, '0');
      const offset = -date.getTimezoneOffset();
      const sign = offset >= 0 ? '+' : '-';
      return `${date.getFullYear()}-${pad(date.getMonth() + 1)}-${pad(date.getDate())}` +
        `T${pad(date.getHours())}:${pad(date.getMinutes())}:${pad(date.getSeconds())}.${pad(date.getMilliseconds(), 3)}` +
        `${sign}${pad(Math.trunc(offset / 60))}:${pad(offset % 60)}`;
    };

    const request = async (path, options = {}, fallback = 'Request failed') => {
      const headers = { 'Content-Type': 'application/json', ...(options.headers || {}) };
      const token = getToken();
      if (token) headers.Authorization = `Bearer ${token}`;
      const response = await fetch(`${API}${path}`, { ...options, headers });
      if (response.status === 204) return null;
      const data = await response.json().catch(() => ({}));
      if (!response.ok) throw new Error(data.error || fallback);
      return data;
    };

    const adoptOAuthRedirect = () => {
      const params = new URLSearchParams(window.location.hash.replace(/^#/, ''));
      const token = params.get('access_token');
      if (token) {
        localStorage.setItem(TOKEN_KEY, token);
        window.location.hash = '#/';
      }
    };

    const checkSession = async () => {
      if (!getToken()) return false;
      try {
        await request('/auth/user');
        return true;
      } catch (err) {
        localStorage.removeItem(TOKEN_KEY);
        return false;
      }
    };

    const loadDashboard = async () => {
      try {
        const at = encodeURIComponent(localIso(new Date()));
        const summary = await request(`/summary?at=${at}`, {}, 'Failed to fetch entries');
        $('earnings').textContent = money(summary.earnings);
        $('expenses').textContent = money(summary.expenses);
        $('balance').textContent = money(summary.balance);
        const list = $('history');
        list.innerHTML = '';
        if (!summary.entries.length) {
          list.innerHTML = '<li>No hay registros aún.</li>';
        }
        for (const entry of summary.entries) {
          const item = document.createElement('li');
          const info = document.createElement('div');
          info.append(entry.type === 'income' ? 'Ingreso' : 'Gasto');
          if (entry.category) {
            const badge = document.createElement('span');
            badge.className = 'badge';
            badge.textContent = entry.category;
            info.append(badge);
          }
          const when = document.createElement('small');
          when.textContent = new Date(entry.date).toLocaleString();
          info.append(document.createElement('br'), when);
          const amount = document.createElement('span');
          amount.className = entry.type === 'income' ? 'amount income' : 'amount expense';
          amount.textContent = money(entry.amount);
          item.append(info, amount);
          list.appendChild(item);
        }
      } catch (err) {
        console.error('Failed to load entries', err);
      }
    };

    const route = async () => {
      adoptOAuthRedirect();
      const path = window.location.hash.replace(/^#/, '') || '/';
      show($('loading'), true);
      Object.values(views).forEach((view) => show(view, false));
      const authenticated = await checkSession();
      show($('loading'), false);
      show($('logout'), authenticated);

      if (path === '/signup') return show(views.signup, true);
      if (path === '/login') return show(views.login, true);
      if (!authenticated) {
        window.location.hash = '#/login';
        return;
      }
      show(views.dashboard, true);
      await loadDashboard();
    };

    $('login-form').addEventListener('submit', async (event) => {
      event.preventDefault();
      alertIn($('login-error'));
      try {
        const data = await request('/auth/login', {
          method: 'POST',
          body: JSON.stringify({ email: $('login-email').value, password: $('login-password').value }),
        }, 'Failed to login');
        localStorage.setItem(TOKEN_KEY, data.session.access_token);
        window.location.hash = '#/';
      } catch (err) {
        alertIn($('login-error'), 'Failed to log in. Please check your credentials.');
        console.error(err);
      }
    });

    $('google-login').addEventListener('click', () => {
      const redirect = encodeURIComponent(window.location.origin + '/');
      window.location.href = `${API}/auth/google?redirect_to=${redirect}`;
    });

    $('signup-form').addEventListener('submit', async (event) => {
      event.preventDefault();
      alertIn($('signup-error'));
      alertIn($('signup-ok'));
      try {
        await request('/auth/signup', {
          method: 'POST',
          body: JSON.stringify({ email: $('signup-email').value, password: $('signup-password').value }),
        }, 'Failed to sign up');
        alertIn($('signup-ok'), 'Account created. You can log in now.');
      } catch (err) {
        alertIn($('signup-error'), err.message);
      }
    });

    document.querySelectorAll('input[name="entry-type"]').forEach((radio) => {
      radio.addEventListener('change', () => {
        show($('entry-category'), radio.value === 'expense' && radio.checked);
      });
    });

    $('entry-form').addEventListener('submit', async (event) => {
      event.preventDefault();
      const type = document.querySelector('input[name="entry-type"]:checked').value;
      const amount = parseFloat($('entry-amount').value);
      const category = $('entry-category').value;
      if (Number.isNaN(amount) || amount <= 0) {
        alert('Por favor, introduce una cantidad válida.');
        return;
      }
      if (type === 'expense' && !category) {
        alert('Selecciona una categoría.');
        return;
      }
      try {
        await request('/entries', {
          method: 'POST',
          body: JSON.stringify({
            type,
            amount,
            category: type === 'expense' ? category : undefined,
            date: new Date().toISOString(),
          }),
        }, 'Failed to add entry');
        $('entry-amount').value = '';
        $('entry-category').value = '';
        await loadDashboard();
      } catch (err) {
        console.error('Failed to add entry', err);
      }
    });

    $('logout').addEventListener('click', async () => {
      try {
        await request('/auth/logout', { method: 'POST' });
      } catch (err) {
        console.error(err);
      }
      localStorage.removeItem(TOKEN_KEY);
      window.location.hash = '#/login';
    });

    window.addEventListener('hashchange', route);
    route();
  </script>
</body>
</html>
"##;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_embeds_token_key_and_categories() {
        let html = render_index();
        assert!(html.contains("const TOKEN_KEY = 'drivers-ledger-token';"));
        assert!(html.contains(r#"<option value="Combustible">Combustible</option>"#));
        assert!(!html.contains("{{"));
    }

    #[test]
    fn history_rows_are_built_as_text_nodes() {
        let html = render_index();
        assert!(html.contains("badge.textContent = entry.category;"));
        assert!(!html.contains("${entry.category}"));
        assert!(!html.contains("item.innerHTML"));
    }
}
