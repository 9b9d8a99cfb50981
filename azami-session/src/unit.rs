//! コードユニットとモジュールのデータモデル

/// 実行コンテキストID
///
/// デバッギ内で同時に動作する論理スレッドの識別子。それぞれ独立に中断できます。
pub type ContextId = u32;

/// モジュールID
///
/// デバッギセッションの生存期間中、全コードユニットを通して一意です。
pub type ModuleId = u32;

/// コードユニット内の1つのソースレベルコンパイル単位
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    pub id: ModuleId,
    /// 表示名（例: `Timer.ext`）
    pub name: String,
    /// パッケージパス（例: `app.util`）
    pub package: String,
    /// 行数
    pub line_count: u32,
    /// 重複排除に使う生の識別文字列
    pub raw_identity: String,
}

impl Module {
    /// パッケージパスを含む完全修飾名を返す
    pub fn full_path(&self) -> String {
        if self.package.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.package, self.name)
        }
    }

    /// 2つのモジュールが「同じ」ソースに見えるかを判定する
    ///
    /// 判定基準はパッケージ名、表示名、行数のみの近似ヒューリスティックで、
    /// 内容ハッシュではありません。
    pub fn looks_like(&self, other: &Module) -> bool {
        self.package == other.package
            && self.name == other.name
            && self.line_count == other.line_count
    }
}

/// デバッギがロード/アンロードできるコードのまとまり
///
/// 1つ以上のモジュールを含みます。`sequence` はセッションが割り当てる
/// 単調増加のロード順序番号で、伝播時の「最後にロードされたユニット」の
/// 決定に使います。
#[derive(Debug, Clone)]
pub struct CodeUnit {
    /// このユニットが見えている実行コンテキスト
    pub context: ContextId,
    /// 識別用URL
    pub url: String,
    /// モジュールテーブルの報告が完了しているか
    pub complete: bool,
    /// ロード順序番号
    pub sequence: u64,
    /// ユニットが含むモジュール
    pub modules: Vec<Module>,
}

impl CodeUnit {
    /// URLからパスと末尾の`?`オプションを取り除いた表示名を返す
    pub fn name(&self) -> &str {
        let tail = self
            .url
            .rsplit(|c| c == '/' || c == '\\')
            .next()
            .unwrap_or(&self.url);
        match tail.find('?') {
            Some(at) => &tail[..at],
            None => tail,
        }
    }

    /// 指定したモジュールを含むか
    pub fn contains(&self, module: ModuleId) -> bool {
        self.modules.iter().any(|m| m.id == module)
    }
}

/// アーム可能な1つの具体的なブレークポイント対象
///
/// (モジュール, 行, 実行コンテキスト) の3つ組。複数のLocationが
/// コードユニットをまたいで「同じ」論理的な場所を表すことがあります。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Location {
    pub module: ModuleId,
    pub line: u32,
    pub context: ContextId,
}

impl Location {
    pub fn new(module: ModuleId, line: u32, context: ContextId) -> Self {
        Self {
            module,
            line,
            context,
        }
    }
}
